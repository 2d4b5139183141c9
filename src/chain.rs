use ethers::types::H256;

use crate::types::{Block, BlockSelector, Header, Receipt};

pub mod in_memory;
pub mod rpc;

pub use self::in_memory::InMemoryChain;
pub use self::rpc::RpcChain;

/// Read access to chain data.
///
/// Implementations are called concurrently by the fee history workers.
/// `Ok(None)` means the requested data is not (or no longer) available,
/// which the oracle treats differently from a failed lookup.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync + 'static {
    async fn header_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Header>>;

    async fn block_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Block>>;

    async fn receipts(
        &self,
        block_hash: H256,
    ) -> eyre::Result<Option<Vec<Receipt>>>;

    /// The block currently being assembled on top of the head, if any
    async fn pending_block_and_receipts(
        &self,
    ) -> Option<(Block, Vec<Receipt>)>;

    async fn finalized_block(&self) -> eyre::Result<Option<Block>>;
}

use ethers::types::H256;
use tokio::sync::RwLock;

use super::ChainReader;
use crate::types::{Block, BlockSelector, Header, Receipt};

/// A canonical chain kept entirely in memory.
///
/// Useful for local tooling and tests. Blocks must be appended in order
/// starting from genesis; [`InMemoryChain::rewind`] drops blocks from the
/// tip to mimic a reorganisation.
#[derive(Debug, Default)]
pub struct InMemoryChain {
    state: RwLock<ChainState>,
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: Vec<(Block, Vec<Receipt>)>,
    pending: Option<(Block, Vec<Receipt>)>,
    finalized: Option<u64>,
}

impl ChainState {
    fn get(&self, number: u64) -> Option<&(Block, Vec<Receipt>)> {
        self.blocks.get(usize::try_from(number).ok()?)
    }

    fn resolve(&self, selector: BlockSelector) -> Option<&Block> {
        match selector {
            BlockSelector::Number(number) => {
                self.get(number).map(|(block, _)| block)
            }
            BlockSelector::Latest => self.blocks.last().map(|(block, _)| block),
            BlockSelector::Pending => self
                .pending
                .as_ref()
                .map(|(block, _)| block)
                .or_else(|| self.blocks.last().map(|(block, _)| block)),
            BlockSelector::Finalized => self
                .finalized
                .and_then(|number| self.get(number))
                .map(|(block, _)| block),
        }
    }
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_block(
        &self,
        block: Block,
        receipts: Vec<Receipt>,
    ) -> eyre::Result<()> {
        let mut state = self.state.write().await;

        let expected = state.blocks.len() as u64;
        if block.number() != expected {
            eyre::bail!(
                "Expected block number {expected}, got {}",
                block.number()
            );
        }

        if block.transactions.len() != receipts.len() {
            eyre::bail!(
                "Block {} has {} transactions but {} receipts",
                block.number(),
                block.transactions.len(),
                receipts.len()
            );
        }

        state.blocks.push((block, receipts));

        Ok(())
    }

    pub async fn set_pending(
        &self,
        pending: Option<(Block, Vec<Receipt>)>,
    ) -> eyre::Result<()> {
        let mut state = self.state.write().await;

        if let Some((block, _)) = &pending {
            let expected = state.blocks.len() as u64;
            if block.number() != expected {
                eyre::bail!(
                    "Pending block must be {expected}, got {}",
                    block.number()
                );
            }
        }

        state.pending = pending;

        Ok(())
    }

    pub async fn set_finalized(&self, number: u64) -> eyre::Result<()> {
        let mut state = self.state.write().await;

        if state.get(number).is_none() {
            eyre::bail!("Cannot finalize unknown block {number}");
        }

        state.finalized = Some(number);

        Ok(())
    }

    /// Drops every block above `head`, returning how many were removed.
    ///
    /// The pending block is discarded and the finalized marker is lowered
    /// if it pointed at a dropped block.
    pub async fn rewind(&self, head: u64) -> usize {
        let mut state = self.state.write().await;

        let keep = usize::try_from(head.saturating_add(1))
            .unwrap_or(usize::MAX)
            .min(state.blocks.len());
        let removed = state.blocks.len() - keep;

        state.blocks.truncate(keep);
        state.pending = None;
        state.finalized = state.finalized.map(|number| number.min(head));

        if removed > 0 {
            tracing::info!(head, removed, "Rewound chain");
        }

        removed
    }

    pub async fn head_number(&self) -> Option<u64> {
        let state = self.state.read().await;

        state.blocks.last().map(|(block, _)| block.number())
    }
}

#[async_trait::async_trait]
impl ChainReader for InMemoryChain {
    async fn header_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Header>> {
        let state = self.state.read().await;

        Ok(state.resolve(selector).map(|block| block.header.clone()))
    }

    async fn block_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Block>> {
        let state = self.state.read().await;

        Ok(state.resolve(selector).cloned())
    }

    async fn receipts(
        &self,
        block_hash: H256,
    ) -> eyre::Result<Option<Vec<Receipt>>> {
        let state = self.state.read().await;

        let receipts = state
            .blocks
            .iter()
            .chain(state.pending.iter())
            .find(|(block, _)| block.hash() == block_hash)
            .map(|(_, receipts)| receipts.clone());

        Ok(receipts)
    }

    async fn pending_block_and_receipts(
        &self,
    ) -> Option<(Block, Vec<Receipt>)> {
        self.state.read().await.pending.clone()
    }

    async fn finalized_block(&self) -> eyre::Result<Option<Block>> {
        let state = self.state.read().await;

        Ok(state.resolve(BlockSelector::Finalized).cloned())
    }
}

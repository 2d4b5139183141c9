use super::FeeHistoryError;
use crate::chain::ChainReader;
use crate::types::{Block, BlockSelector, Receipt};

/// Concrete block range of a fee history query.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRange {
    /// Set when the range ends at the pending block
    pub pending: Option<(Block, Vec<Receipt>)>,
    pub last_block: u64,
    /// Number of blocks in the range, zero if there is nothing to return
    pub count: u64,
}

impl ResolvedRange {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn oldest_block(&self) -> u64 {
        self.last_block + 1 - self.count
    }
}

/// Resolves the last block selector into an absolute number and clamps the
/// block count so the range never starts before genesis.
pub async fn resolve_block_range<C>(
    chain: &C,
    last: BlockSelector,
    mut count: u64,
) -> Result<ResolvedRange, FeeHistoryError>
where
    C: ChainReader + ?Sized,
{
    let head = chain
        .header_by_number(BlockSelector::Latest)
        .await?
        .ok_or(FeeHistoryError::UnresolvedBlock(BlockSelector::Latest))?
        .number;

    let mut pending = None;

    let last_block = match last {
        BlockSelector::Number(requested) if requested > head => {
            return Err(FeeHistoryError::BeyondHead { requested, head });
        }
        BlockSelector::Number(number) => number,
        BlockSelector::Latest => head,
        BlockSelector::Pending => {
            match chain.pending_block_and_receipts().await {
                Some((block, receipts)) => {
                    let number = block.number();
                    pending = Some((block, receipts));
                    number
                }
                None => {
                    // One fewer concrete block is available
                    count = count.saturating_sub(1);
                    head
                }
            }
        }
        BlockSelector::Finalized => chain
            .finalized_block()
            .await?
            .ok_or(FeeHistoryError::UnresolvedBlock(BlockSelector::Finalized))?
            .number(),
    };

    if count == 0 {
        return Ok(ResolvedRange::default());
    }

    // Ensure not trying to retrieve before genesis
    let count = count.min(last_block.saturating_add(1));

    Ok(ResolvedRange {
        pending,
        last_block,
        count,
    })
}

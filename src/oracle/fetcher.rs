use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::rewards::{process_block, ProcessedFees};
use crate::chain::ChainReader;
use crate::config::ChainConfig;
use crate::types::{Block, Header, Receipt};

/// A single block being processed for a fee history query.
#[derive(Debug, Clone)]
pub struct BlockFees {
    pub number: u64,
    pub header: Option<Header>,
    /// Only set if reward percentiles are requested
    pub block: Option<Block>,
    pub receipts: Option<Vec<Receipt>>,
    /// `None` if the block was not available, e.g. after a reorg
    pub results: Option<ProcessedFees>,
}

impl BlockFees {
    fn new(number: u64) -> Self {
        Self {
            number,
            header: None,
            block: None,
            receipts: None,
            results: None,
        }
    }
}

/// Inputs shared by every worker of a single query.
struct FetchJob<C: ?Sized> {
    chain: Arc<C>,
    config: Arc<ChainConfig>,
    percentiles: Arc<[f64]>,
    pending: Option<Arc<(Block, Vec<Receipt>)>>,
    last_block: u64,
    next: AtomicU64,
    cancelled: AtomicBool,
}

/// Pool of workers pulling the blocks of an inclusive range concurrently.
///
/// Results arrive in completion order. Dropping the fetcher stops the
/// workers: none of them claims another block and in-flight requests are
/// aborted.
pub struct BlockFeeFetcher<C: ?Sized> {
    job: Arc<FetchJob<C>>,
    results: mpsc::Receiver<eyre::Result<BlockFees>>,
    workers: JoinSet<()>,
}

impl<C> BlockFeeFetcher<C>
where
    C: ChainReader + ?Sized,
{
    /// Spawns `min(max_fetchers, range length)` workers on the current
    /// runtime.
    pub fn spawn(
        chain: Arc<C>,
        config: Arc<ChainConfig>,
        max_fetchers: usize,
        oldest_block: u64,
        last_block: u64,
        percentiles: Arc<[f64]>,
        pending: Option<(Block, Vec<Receipt>)>,
    ) -> Self {
        let range_len = usize::try_from(last_block - oldest_block + 1)
            .unwrap_or(usize::MAX);

        let job = Arc::new(FetchJob {
            chain,
            config,
            percentiles,
            pending: pending.map(Arc::new),
            last_block,
            next: AtomicU64::new(oldest_block),
            cancelled: AtomicBool::new(false),
        });

        // Room for every block in the range, so workers never wait on the
        // consumer
        let (sender, results) = mpsc::channel(range_len);

        let num_workers = max_fetchers.min(range_len);
        tracing::debug!(
            oldest_block,
            last_block,
            num_workers,
            "Spawning block fee fetchers"
        );

        let mut workers = JoinSet::new();
        for _ in 0..num_workers {
            workers.spawn(run_worker(job.clone(), sender.clone()));
        }

        Self {
            job,
            results,
            workers,
        }
    }

    /// Receives the next processed block, `None` once every worker is done.
    pub async fn next(&mut self) -> Option<eyre::Result<BlockFees>> {
        self.results.recv().await
    }

    /// Explains why the workers stopped before covering the whole range.
    ///
    /// Only meaningful once [`BlockFeeFetcher::next`] returned `None` early.
    pub async fn worker_failure(&mut self) -> eyre::Report {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                return eyre::Report::new(err)
                    .wrap_err("Block fee fetcher failed");
            }
        }

        eyre::eyre!("Block fee fetchers stopped before completing the range")
    }
}

impl<C: ?Sized> Drop for BlockFeeFetcher<C> {
    fn drop(&mut self) {
        self.job.cancelled.store(true, Ordering::Relaxed);

        if !self.workers.is_empty() {
            tracing::debug!(
                workers = self.workers.len(),
                "Cancelling block fee fetchers"
            );
        }

        self.workers.abort_all();
    }
}

async fn run_worker<C>(
    job: Arc<FetchJob<C>>,
    sender: mpsc::Sender<eyre::Result<BlockFees>>,
) where
    C: ChainReader + ?Sized,
{
    loop {
        if job.cancelled.load(Ordering::Relaxed) {
            return;
        }

        // Retrieve the next block number to fetch with this worker
        let number = job.next.fetch_add(1, Ordering::SeqCst);
        if number > job.last_block {
            return;
        }

        let fees = fetch_block_fees(&job, number).await;

        if sender.send(fees).await.is_err() {
            return;
        }
    }
}

async fn fetch_block_fees<C>(
    job: &FetchJob<C>,
    number: u64,
) -> eyre::Result<BlockFees>
where
    C: ChainReader + ?Sized,
{
    let mut fees = BlockFees::new(number);

    match job.pending.as_deref() {
        Some((block, receipts)) if block.number() == number => {
            fees.header = Some(block.header.clone());
            fees.block = Some(block.clone());
            fees.receipts = Some(receipts.clone());
        }
        _ if !job.percentiles.is_empty() => {
            fees.block = job.chain.block_by_number(number.into()).await?;

            if let Some(block) = &fees.block {
                fees.receipts = job.chain.receipts(block.hash()).await?;
                fees.header = Some(block.header.clone());
            }
        }
        _ => {
            fees.header = job.chain.header_by_number(number.into()).await?;
        }
    }

    if let Some(header) = &fees.header {
        fees.results = Some(process_block(
            &job.config,
            header,
            fees.block.as_ref(),
            fees.receipts.as_deref(),
            &job.percentiles,
        ));
    }

    Ok(fees)
}

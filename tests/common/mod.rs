#![allow(dead_code)] // Needed because this module is imported as module by many test crates

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::{H256, U256};
use fee_oracle::chain::{ChainReader, InMemoryChain};
use fee_oracle::config::{ChainConfig, OracleConfig};
use fee_oracle::eip1559::calc_base_fee;
use fee_oracle::oracle::FeeHistoryOracle;
use fee_oracle::params::INITIAL_BASE_FEE;
use fee_oracle::types::{Block, BlockSelector, Header, Receipt, Transaction};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub mod prelude {
    pub use std::sync::Arc;

    pub use ethers::types::U256;
    pub use fee_oracle::chain::{ChainReader, InMemoryChain};
    pub use fee_oracle::config::{ChainConfig, OracleConfig};
    pub use fee_oracle::oracle::{
        FeeHistoryError, FeeHistoryOracle, FeeHistoryResult,
    };
    pub use fee_oracle::types::BlockSelector;

    pub use super::{setup_oracle, setup_tracing, ChainBuilder, FlakyChain};
}

pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;

pub fn setup_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer().compact())
        .with(EnvFilter::from_default_env())
        .try_init();
}

pub fn setup_oracle<C>(chain: Arc<C>) -> eyre::Result<FeeHistoryOracle<C>>
where
    C: ChainReader,
{
    FeeHistoryOracle::new(
        chain,
        ChainConfig::default(),
        OracleConfig::default(),
    )
}

/// Builds a chain whose base fees follow the fee market rules.
///
/// Block `n` carries `n % 4` transactions, so the chain alternates between
/// blocks above and below the gas target.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    pub config: ChainConfig,
    pub blocks: u64,
    pub gas_limit: u64,
    pub gas_per_tx: u64,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self {
            config: ChainConfig::default(),
            blocks: 16,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_per_tx: 6_000_000,
        }
    }
}

impl ChainBuilder {
    pub fn blocks(mut self, blocks: u64) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn eip1559_block(mut self, eip1559_block: Option<u64>) -> Self {
        self.config.eip1559_block = eip1559_block;
        self
    }

    pub fn headers(&self) -> Vec<(Block, Vec<Receipt>)> {
        let mut blocks: Vec<(Block, Vec<Receipt>)> = vec![];

        for number in 0..self.blocks {
            let parent = blocks.last().map(|(block, _)| &block.header);
            let block = self.block(number, parent);
            blocks.push(block);
        }

        blocks
    }

    pub fn block(
        &self,
        number: u64,
        parent: Option<&Header>,
    ) -> (Block, Vec<Receipt>) {
        let (transactions, receipts): (Vec<_>, Vec<_>) = (0..number % 4)
            .map(|i| {
                let hash = H256::from_low_u64_be(1_000 * (number + 1) + i);

                (
                    Transaction {
                        hash,
                        gas: 21_000 + 1_000 * (3 - i),
                    },
                    Receipt {
                        transaction_hash: hash,
                        gas_used: self.gas_per_tx,
                    },
                )
            })
            .unzip();

        let gas_limit = if self.config.is_eip1559(number) {
            self.gas_limit
        } else {
            self.gas_limit / self.config.elasticity_multiplier
        };

        let base_fee = match parent {
            _ if !self.config.is_eip1559(number) => None,
            Some(parent) => Some(calc_base_fee(&self.config, parent)),
            None => Some(U256::from(INITIAL_BASE_FEE)),
        };

        let block = Block {
            header: Header {
                number,
                hash: H256::from_low_u64_be(number + 1),
                gas_limit,
                gas_used: self.gas_per_tx * transactions.len() as u64,
                base_fee,
            },
            transactions,
        };

        (block, receipts)
    }

    pub async fn build(&self) -> eyre::Result<InMemoryChain> {
        let chain = InMemoryChain::new();

        for (block, receipts) in self.headers() {
            chain.push_block(block, receipts).await?;
        }

        Ok(chain)
    }
}

/// Wraps a chain, hiding or failing lookups of chosen block numbers.
pub struct FlakyChain {
    pub inner: InMemoryChain,
    pub hidden: HashSet<u64>,
    pub failing: HashSet<u64>,
}

impl FlakyChain {
    pub fn new(inner: InMemoryChain) -> Self {
        Self {
            inner,
            hidden: HashSet::new(),
            failing: HashSet::new(),
        }
    }

    pub fn hide(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.hidden.extend(numbers);
        self
    }

    pub fn fail(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(numbers);
        self
    }

    fn check(&self, selector: BlockSelector) -> eyre::Result<bool> {
        let Some(number) = selector.as_number() else {
            return Ok(true);
        };

        if self.failing.contains(&number) {
            eyre::bail!("Failed to fetch block {number}");
        }

        Ok(!self.hidden.contains(&number))
    }
}

#[async_trait::async_trait]
impl ChainReader for FlakyChain {
    async fn header_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Header>> {
        if !self.check(selector)? {
            return Ok(None);
        }

        self.inner.header_by_number(selector).await
    }

    async fn block_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Block>> {
        if !self.check(selector)? {
            return Ok(None);
        }

        self.inner.block_by_number(selector).await
    }

    async fn receipts(
        &self,
        block_hash: H256,
    ) -> eyre::Result<Option<Vec<Receipt>>> {
        self.inner.receipts(block_hash).await
    }

    async fn pending_block_and_receipts(
        &self,
    ) -> Option<(Block, Vec<Receipt>)> {
        self.inner.pending_block_and_receipts().await
    }

    async fn finalized_block(&self) -> eyre::Result<Option<Block>> {
        self.inner.finalized_block().await
    }
}

use std::sync::Arc;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::ChainReader;
use crate::config::{ChainConfig, OracleConfig};
use crate::types::BlockSelector;

pub mod fetcher;
pub mod range;
pub mod rewards;

use self::fetcher::BlockFeeFetcher;
use self::range::resolve_block_range;
use self::rewards::ProcessedFees;

#[derive(Debug, Error)]
pub enum FeeHistoryError {
    #[error("too many reward percentiles, max: {max}, requested: {requested}")]
    TooManyPercentiles { max: usize, requested: usize },

    #[error("invalid reward percentile at index {index}: {value}")]
    PercentileOutOfRange { index: usize, value: f64 },

    #[error(
        "reward percentiles are not increasing at index {index}: \
         {previous} followed by {value}"
    )]
    PercentilesNotIncreasing {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("requested block {requested} is beyond head {head}")]
    BeyondHead { requested: u64, head: u64 },

    #[error("could not resolve {0} block")]
    UnresolvedBlock(BlockSelector),

    #[error(transparent)]
    Fetch(#[from] eyre::Report),
}

impl FeeHistoryError {
    /// Category of the error, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooManyPercentiles { .. }
            | Self::PercentileOutOfRange { .. }
            | Self::PercentilesNotIncreasing { .. } => "validation",
            Self::BeyondHead { .. } | Self::UnresolvedBlock(_) => "range",
            Self::Fetch(_) => "fetch",
        }
    }

    /// Malformed reward percentiles
    pub fn is_validation(&self) -> bool {
        self.kind() == "validation"
    }

    /// The requested range is not available
    pub fn is_range(&self) -> bool {
        self.kind() == "range"
    }

    /// Chain data could not be retrieved
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// Fee history over a contiguous range of blocks.
///
/// Base fee arrays carry one more entry than the number of blocks, the last
/// one being the projection for the block after the range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHistoryResult {
    #[serde(with = "serde_quantity")]
    pub oldest_block: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<Vec<Vec<U256>>>,
    pub base_fee_per_gas: Vec<U256>,
    pub gas_used_ratio: Vec<f64>,
    pub base_fee_per_blob_gas: Vec<U256>,
    pub blob_gas_used_ratio: Vec<f64>,
}

impl FeeHistoryResult {
    /// Number of blocks covered
    pub fn len(&self) -> usize {
        self.gas_used_ratio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gas_used_ratio.is_empty()
    }

    fn from_processed(
        oldest_block: u64,
        fees: &[ProcessedFees],
        with_rewards: bool,
    ) -> Self {
        let Some(last) = fees.last() else {
            return Self::default();
        };

        let reward = with_rewards.then(|| {
            fees.iter()
                .map(|f| f.reward.clone().unwrap_or_default())
                .collect()
        });

        let base_fee_per_gas = fees
            .iter()
            .map(|f| f.base_fee)
            .chain(std::iter::once(last.next_base_fee))
            .collect();

        let base_fee_per_blob_gas = fees
            .iter()
            .map(|f| f.blob_base_fee)
            .chain(std::iter::once(last.next_blob_base_fee))
            .collect();

        Self {
            oldest_block,
            reward,
            base_fee_per_gas,
            gas_used_ratio: fees.iter().map(|f| f.gas_used_ratio).collect(),
            base_fee_per_blob_gas,
            blob_gas_used_ratio: fees
                .iter()
                .map(|f| f.blob_gas_used_ratio)
                .collect(),
        }
    }
}

/// Block numbers as hex quantities, like the fee fields next to them
mod serde_quantity {
    use ethers::types::U64;
    use serde::{Deserialize, Serialize};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        U64::from(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(U64::deserialize(deserializer)?.as_u64())
    }
}

/// Answers fee history queries from chain data.
pub struct FeeHistoryOracle<C: ?Sized> {
    chain: Arc<C>,
    chain_config: Arc<ChainConfig>,
    config: OracleConfig,
}

impl<C> FeeHistoryOracle<C>
where
    C: ChainReader + ?Sized,
{
    pub fn new(
        chain: Arc<C>,
        chain_config: ChainConfig,
        config: OracleConfig,
    ) -> eyre::Result<Self> {
        chain_config.validate()?;
        config.validate()?;

        Ok(Self {
            chain,
            chain_config: Arc::new(chain_config),
            config,
        })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Returns base fees, gas used ratios and reward percentiles for up to
    /// `block_count` blocks ending at `last_block`.
    ///
    /// An empty result is not an error: it is returned when nothing was
    /// requested or when the first block of the range is not available.
    #[tracing::instrument(skip(self))]
    pub async fn fee_history(
        &self,
        block_count: u64,
        last_block: BlockSelector,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistoryResult, FeeHistoryError> {
        metrics::counter!("fee_history_requests").increment(1);

        let result = self
            .collect_fee_history(block_count, last_block, reward_percentiles)
            .await;

        match &result {
            Ok(history) => {
                metrics::histogram!("fee_history_blocks")
                    .record(history.len() as f64);
            }
            Err(err) => {
                let category = err.kind();
                metrics::counter!("fee_history_errors", "category" => category)
                    .increment(1);
            }
        }

        result
    }

    async fn collect_fee_history(
        &self,
        mut block_count: u64,
        last_block: BlockSelector,
        percentiles: &[f64],
    ) -> Result<FeeHistoryResult, FeeHistoryError> {
        if block_count < 1 {
            return Ok(FeeHistoryResult::default());
        }

        self.validate_percentiles(percentiles)?;

        let max_history = if percentiles.is_empty() {
            self.config.max_header_history
        } else {
            self.config.max_block_history
        };

        if block_count > max_history {
            tracing::warn!(
                requested = block_count,
                truncated = max_history,
                "Sanitizing fee history length"
            );

            block_count = max_history;
        }

        let range =
            resolve_block_range(self.chain.as_ref(), last_block, block_count)
                .await?;

        if range.is_empty() {
            return Ok(FeeHistoryResult::default());
        }

        let oldest_block = range.oldest_block();
        tracing::debug!(
            oldest_block,
            last_block = range.last_block,
            pending = range.pending.is_some(),
            "Resolved fee history range"
        );

        let mut fetcher = BlockFeeFetcher::spawn(
            self.chain.clone(),
            self.chain_config.clone(),
            self.config.max_block_fetchers,
            oldest_block,
            range.last_block,
            Arc::from(percentiles),
            range.pending,
        );

        let count = range.count as usize;
        let mut processed: Vec<Option<ProcessedFees>> = vec![None; count];

        for _ in 0..count {
            // Every claimed block yields a sample unless a worker died
            let Some(sample) = fetcher.next().await else {
                return Err(fetcher.worker_failure().await.into());
            };

            // Dropping the fetcher on error stops the remaining workers
            let sample = sample?;

            let index = (sample.number - oldest_block) as usize;
            if let Some(slot) = processed.get_mut(index) {
                *slot = sample.results;
            }
        }

        drop(fetcher);

        // Only the contiguous prefix up to the first missing block is kept
        let available = processed.iter().take_while(|f| f.is_some()).count();
        if available == 0 {
            return Ok(FeeHistoryResult::default());
        }

        if available < count {
            tracing::debug!(
                first_missing = oldest_block + available as u64,
                "Truncating fee history at missing block"
            );
        }

        let fees = processed
            .into_iter()
            .map_while(|f| f)
            .collect::<Vec<_>>();

        Ok(FeeHistoryResult::from_processed(
            oldest_block,
            &fees,
            !percentiles.is_empty(),
        ))
    }

    fn validate_percentiles(
        &self,
        percentiles: &[f64],
    ) -> Result<(), FeeHistoryError> {
        if percentiles.len() > self.config.max_percentiles {
            return Err(FeeHistoryError::TooManyPercentiles {
                max: self.config.max_percentiles,
                requested: percentiles.len(),
            });
        }

        for (index, &value) in percentiles.iter().enumerate() {
            // Also rejects NaN
            if !(0.0..=100.0).contains(&value) {
                return Err(FeeHistoryError::PercentileOutOfRange {
                    index,
                    value,
                });
            }

            if let Some(&previous) =
                index.checked_sub(1).and_then(|i| percentiles.get(i))
            {
                if value <= previous {
                    return Err(FeeHistoryError::PercentilesNotIncreasing {
                        index,
                        previous,
                        value,
                    });
                }
            }
        }

        Ok(())
    }
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::{
    DEFAULT_BASE_FEE_CHANGE_DENOMINATOR, DEFAULT_ELASTICITY_MULTIPLIER,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    pub rpc: RpcConfig,
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        self.chain.validate()?;
        self.oracle.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Emit logs as JSON lines instead of the compact human format
    #[serde(default)]
    pub json_logs: bool,
}

/// Fee market parameters of a chain.
///
/// Immutable once the oracle is built; every node must agree on these values
/// for base fees to match across implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChainConfig {
    /// First block at which the fee market rules apply, `None` if never
    #[serde(default = "default::eip1559_block")]
    pub eip1559_block: Option<u64>,
    #[serde(default = "default::elasticity_multiplier")]
    pub elasticity_multiplier: u64,
    #[serde(default = "default::base_fee_change_denominator")]
    pub base_fee_change_denominator: u64,
}

impl ChainConfig {
    pub fn is_eip1559(&self, number: u64) -> bool {
        self.eip1559_block
            .is_some_and(|fork_block| number >= fork_block)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.elasticity_multiplier == 0 {
            eyre::bail!("elasticity_multiplier must be greater than zero");
        }

        if self.base_fee_change_denominator == 0 {
            eyre::bail!(
                "base_fee_change_denominator must be greater than zero"
            );
        }

        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            eip1559_block: default::eip1559_block(),
            elasticity_multiplier: DEFAULT_ELASTICITY_MULTIPLIER,
            base_fee_change_denominator: DEFAULT_BASE_FEE_CHANGE_DENOMINATOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OracleConfig {
    /// Max number of reward percentiles in a single query
    #[serde(default = "default::max_percentiles")]
    pub max_percentiles: usize,
    /// Window cap for queries that only need headers
    #[serde(default = "default::max_header_history")]
    pub max_header_history: u64,
    /// Window cap for queries that need full blocks and receipts
    #[serde(default = "default::max_block_history")]
    pub max_block_history: u64,
    /// Max number of concurrent block fetchers per query
    #[serde(default = "default::max_block_fetchers")]
    pub max_block_fetchers: usize,
}

impl OracleConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_block_fetchers == 0 {
            eyre::bail!("max_block_fetchers must be greater than zero");
        }

        if self.max_block_history > self.max_header_history {
            eyre::bail!(
                "max_block_history ({}) exceeds max_header_history ({})",
                self.max_block_history,
                self.max_header_history
            );
        }

        Ok(())
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_percentiles: default::max_percentiles(),
            max_header_history: default::max_header_history(),
            max_block_history: default::max_block_history(),
            max_block_fetchers: default::max_block_fetchers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    pub http_url: url::Url,

    #[serde(with = "humantime_serde", default = "default::rpc_timeout")]
    pub timeout: Duration,
}

mod default {
    use std::time::Duration;

    use crate::params::{
        DEFAULT_BASE_FEE_CHANGE_DENOMINATOR, DEFAULT_ELASTICITY_MULTIPLIER,
    };

    pub fn eip1559_block() -> Option<u64> {
        Some(0)
    }

    pub fn elasticity_multiplier() -> u64 {
        DEFAULT_ELASTICITY_MULTIPLIER
    }

    pub fn base_fee_change_denominator() -> u64 {
        DEFAULT_BASE_FEE_CHANGE_DENOMINATOR
    }

    pub fn max_percentiles() -> usize {
        100
    }

    pub fn max_header_history() -> u64 {
        1024
    }

    pub fn max_block_history() -> u64 {
        256
    }

    pub fn max_block_fetchers() -> usize {
        4
    }

    pub fn rpc_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

pub fn load_config<'a>(
    config_files: impl Iterator<Item = &'a Path>,
) -> eyre::Result<Config> {
    let mut settings = config::Config::builder();

    for config_file in config_files {
        settings = settings.add_source(config::File::from(config_file));
    }

    let settings = settings
        .add_source(
            config::Environment::with_prefix("FEE_ORACLE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = settings.try_deserialize::<Config>()?;

    config.validate()?;

    Ok(config)
}

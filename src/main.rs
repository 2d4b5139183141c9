use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fee_oracle::chain::RpcChain;
use fee_oracle::config::load_config;
use fee_oracle::estimate::estimate_percentile_fees;
use fee_oracle::oracle::FeeHistoryOracle;
use fee_oracle::types::BlockSelector;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
#[clap(rename_all = "kebab-case")]
struct Args {
    #[clap(short, long)]
    #[cfg_attr(
        feature = "default-config",
        clap(default_value = "config.toml")
    )]
    config: Vec<PathBuf>,

    #[clap(short, long)]
    env_file: Vec<PathBuf>,

    /// Number of blocks to query
    #[clap(short, long, default_value = "10")]
    block_count: u64,

    /// Last block of the range: a number, `latest`, `pending` or `finalized`
    #[clap(short, long, default_value = "latest")]
    last_block: BlockSelector,

    /// Reward percentiles, comma separated
    #[clap(short, long, value_delimiter = ',')]
    percentiles: Vec<f64>,

    /// Print a fee estimate instead of the raw history
    #[clap(long)]
    estimate: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    dotenv::dotenv().ok();

    for path in &args.env_file {
        dotenv::from_path(path)?;
    }

    let config = load_config(args.config.iter().map(PathBuf::as_ref))?;

    let json_logs = config.service.json_logs;
    tracing_subscriber::registry()
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with(
            (!json_logs)
                .then(|| tracing_subscriber::fmt::layer().pretty().compact()),
        )
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!(?config, "Starting fee oracle");

    let chain = RpcChain::new(&config.rpc)?;
    let oracle =
        FeeHistoryOracle::new(Arc::new(chain), config.chain, config.oracle)?;

    let history = oracle
        .fee_history(args.block_count, args.last_block, &args.percentiles)
        .await?;

    let output = if args.estimate {
        serde_json::to_string_pretty(&estimate_percentile_fees(&history)?)?
    } else {
        serde_json::to_string_pretty(&history)?
    };

    println!("{output}");

    Ok(())
}

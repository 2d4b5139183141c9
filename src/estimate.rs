use ethers::types::U256;
use eyre::ContextCompat;
use serde::{Deserialize, Serialize};

use crate::oracle::FeeHistoryResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeesEstimate {
    /// Projected base fee of the block after the history
    pub base_fee_per_gas: U256,
    pub percentile_fees: Vec<U256>,
    pub base_fee_per_blob_gas: U256,
}

pub fn estimate_percentile_fees(
    fee_history: &FeeHistoryResult,
) -> eyre::Result<FeesEstimate> {
    // Take the last base fee per gas
    let base_fee_per_gas = fee_history
        .base_fee_per_gas
        .last()
        .context("Missing base fees")?;

    let base_fee_per_blob_gas = fee_history
        .base_fee_per_blob_gas
        .last()
        .context("Missing base blob fees")?;

    let reward = fee_history.reward.as_ref().context("Missing rewards")?;

    // Rows are empty for blocks whose receipts were unavailable
    let rows = reward
        .iter()
        .filter(|rewards| !rewards.is_empty())
        .collect::<Vec<_>>();

    let num_percentiles = rows.first().context("Missing rewards")?.len();
    let percentile_fees = (0..num_percentiles)
        .map(|percentile_idx| estimate_percentile(&rows, percentile_idx))
        .collect::<eyre::Result<Vec<_>>>()?;

    Ok(FeesEstimate {
        base_fee_per_gas: *base_fee_per_gas,
        percentile_fees,
        base_fee_per_blob_gas: *base_fee_per_blob_gas,
    })
}

// Just takes the average of the percentile fees
fn estimate_percentile(
    rows: &[&Vec<U256>],
    percentile_idx: usize,
) -> eyre::Result<U256> {
    let mut sum = U256::zero();

    for rewards in rows {
        let percentile_fee = rewards
            .get(percentile_idx)
            .context("Missing percentile fee")?;

        sum = sum.saturating_add(*percentile_fee);
    }

    Ok(sum / rows.len())
}

/// Returns `(max_fee_per_gas, max_priority_fee_per_gas)` for the chosen
/// percentile, with the base fee component capped at `max_base_fee_per_gas`.
pub fn calculate_gas_fees_from_estimates(
    estimates: &FeesEstimate,
    percentile_idx: usize,
    max_base_fee_per_gas: U256,
) -> eyre::Result<(U256, U256)> {
    let max_priority_fee_per_gas = *estimates
        .percentile_fees
        .get(percentile_idx)
        .context("Missing percentile fee")?;

    let max_fee_per_gas = estimates
        .base_fee_per_gas
        .min(max_base_fee_per_gas)
        .saturating_add(max_priority_fee_per_gas);

    Ok((max_fee_per_gas, max_priority_fee_per_gas))
}

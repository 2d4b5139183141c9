use ethers::types::U256;

use crate::config::ChainConfig;
use crate::eip1559::calc_base_fee;
use crate::types::{Block, Header, Receipt, Transaction};

/// Fee data derived from a single block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedFees {
    /// One entry per requested percentile, absent if none were requested or
    /// the block data needed to compute them was missing
    pub reward: Option<Vec<U256>>,
    pub base_fee: U256,
    /// Base fee projected for the following block
    pub next_base_fee: U256,
    pub gas_used_ratio: f64,
    pub blob_gas_used_ratio: f64,
    pub blob_base_fee: U256,
    pub next_blob_base_fee: U256,
}

/// Transactions sorted in ascending order based on reward
#[derive(Debug, Clone, Copy)]
struct TxGasAndReward {
    gas_used: u64,
    reward: U256,
}

/// Computes the fee data of a block.
///
/// `block` and `receipts` are only consulted when `percentiles` is not empty.
pub fn process_block(
    config: &ChainConfig,
    header: &Header,
    block: Option<&Block>,
    receipts: Option<&[Receipt]>,
    percentiles: &[f64],
) -> ProcessedFees {
    let mut results = ProcessedFees {
        base_fee: header.base_fee.unwrap_or_default(),
        ..Default::default()
    };

    if config.is_eip1559(header.number.saturating_add(1)) {
        results.next_base_fee = calc_base_fee(config, header);
    }

    if header.gas_limit > 0 {
        results.gas_used_ratio =
            header.gas_used as f64 / header.gas_limit as f64;
    }

    if percentiles.is_empty() {
        return results;
    }

    let Some(block) = block else {
        tracing::error!(
            block_number = header.number,
            "Block is missing while reward percentiles are requested"
        );

        return results;
    };

    let receipts: &[Receipt] = match receipts {
        Some(receipts) if receipts.len() == block.transactions.len() => {
            receipts
        }
        // An empty block needs no receipts
        _ if block.transactions.is_empty() => &[],
        receipts => {
            tracing::error!(
                block_number = header.number,
                transactions = block.transactions.len(),
                receipts = ?receipts.map(<[Receipt]>::len),
                "Receipts are missing while reward percentiles are requested"
            );

            return results;
        }
    };

    results.reward = Some(reward_percentiles(
        block.gas_used(),
        &block.transactions,
        receipts,
        percentiles,
    ));

    results
}

/// Computes the reward at each percentile of gas used in a block.
///
/// `percentiles` must be sorted in ascending order and `receipts` must line up
/// with `transactions`. Each transaction is weighted by the gas it used, and
/// its reward is its declared gas allowance.
pub fn reward_percentiles(
    block_gas_used: u64,
    transactions: &[Transaction],
    receipts: &[Receipt],
    percentiles: &[f64],
) -> Vec<U256> {
    // An all zero row if there are no transactions to gather data from
    if transactions.is_empty() {
        return vec![U256::zero(); percentiles.len()];
    }

    let sorter = sorted_by_reward(transactions, receipts);

    let mut tx_index = 0;
    let mut sum_gas_used = sorter[0].gas_used;

    percentiles
        .iter()
        .map(|p| {
            let threshold_gas_used =
                (block_gas_used as f64 * p / 100.0) as u64;

            while sum_gas_used < threshold_gas_used
                && tx_index < sorter.len() - 1
            {
                tx_index += 1;
                sum_gas_used += sorter[tx_index].gas_used;
            }

            sorter[tx_index].reward
        })
        .collect()
}

fn sorted_by_reward(
    transactions: &[Transaction],
    receipts: &[Receipt],
) -> Vec<TxGasAndReward> {
    let mut sorter = transactions
        .iter()
        .zip(receipts)
        .map(|(tx, receipt)| TxGasAndReward {
            gas_used: receipt.gas_used,
            reward: U256::from(tx.gas),
        })
        .collect::<Vec<_>>();

    // Stable, so equal rewards keep block order
    sorter.sort_by(|a, b| a.reward.cmp(&b.reward));

    sorter
}

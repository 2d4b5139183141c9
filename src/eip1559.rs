use ethers::types::U256;
use thiserror::Error;

use crate::config::ChainConfig;
use crate::params::{GAS_LIMIT_BOUND_DIVISOR, INITIAL_BASE_FEE, MIN_GAS_LIMIT};
use crate::types::Header;

/// Header fields that violate the fee market rules. Fatal to header
/// acceptance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("invalid gas limit: have {have}, want {want} +-= {limit}")]
    InvalidGasLimit { have: u64, want: u64, limit: u64 },

    #[error("invalid gas limit {have} below {minimum}")]
    GasLimitBelowMinimum { have: u64, minimum: u64 },

    #[error("header is missing baseFee")]
    MissingBaseFee,

    #[error(
        "invalid baseFee: have {have}, want {want}, \
         parentBaseFee {parent_base_fee}, parentGasUsed {parent_gas_used}"
    )]
    InvalidBaseFee {
        have: U256,
        want: U256,
        parent_base_fee: U256,
        parent_gas_used: u64,
    },
}

/// Calculates the base fee of the block following `parent`.
pub fn calc_base_fee(config: &ChainConfig, parent: &Header) -> U256 {
    // The first fee market block starts from the initial base fee
    if !config.is_eip1559(parent.number) {
        return U256::from(INITIAL_BASE_FEE);
    }

    let parent_base_fee = parent.base_fee.unwrap_or_default();
    let parent_gas_target = parent.gas_limit / config.elasticity_multiplier;

    if parent.gas_used == parent_gas_target {
        return parent_base_fee;
    }

    // A zero target means the parent had no capacity to speak of
    if parent_gas_target == 0 {
        return parent_base_fee.saturating_add(U256::one());
    }

    if parent.gas_used > parent_gas_target {
        let delta = base_fee_delta(
            config,
            parent_base_fee,
            parent.gas_used - parent_gas_target,
            parent_gas_target,
        );

        parent_base_fee.saturating_add(delta.max(U256::one()))
    } else {
        let delta = base_fee_delta(
            config,
            parent_base_fee,
            parent_gas_target - parent.gas_used,
            parent_gas_target,
        );

        parent_base_fee.saturating_sub(delta)
    }
}

/// `base_fee * gas_delta / gas_target / denominator`, truncating at each
/// division.
fn base_fee_delta(
    config: &ChainConfig,
    base_fee: U256,
    gas_delta: u64,
    gas_target: u64,
) -> U256 {
    let num = base_fee.full_mul(U256::from(gas_delta));
    let num = num / gas_target / config.base_fee_change_denominator;

    U256::try_from(num).unwrap_or(U256::MAX)
}

/// Verifies the gas limit of a header against its parent's.
pub fn verify_gas_limit(
    parent_gas_limit: u64,
    header_gas_limit: u64,
) -> Result<(), ConsensusError> {
    let diff = parent_gas_limit.abs_diff(header_gas_limit);
    let limit = parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR;

    if diff >= limit {
        return Err(ConsensusError::InvalidGasLimit {
            have: header_gas_limit,
            want: parent_gas_limit,
            limit: limit.saturating_sub(1),
        });
    }

    if header_gas_limit < MIN_GAS_LIMIT {
        return Err(ConsensusError::GasLimitBelowMinimum {
            have: header_gas_limit,
            minimum: MIN_GAS_LIMIT,
        });
    }

    Ok(())
}

/// Verifies the header attributes changed by the fee market: the gas limit
/// delta and the declared base fee.
pub fn verify_header(
    config: &ChainConfig,
    parent: &Header,
    header: &Header,
) -> Result<(), ConsensusError> {
    let mut parent_gas_limit = parent.gas_limit;

    // Pre-fork limits described the full capacity, scale to the new elastic
    // ceiling
    if !config.is_eip1559(parent.number) {
        parent_gas_limit =
            parent_gas_limit.saturating_mul(config.elasticity_multiplier);
    }

    verify_gas_limit(parent_gas_limit, header.gas_limit)?;

    let base_fee = header.base_fee.ok_or(ConsensusError::MissingBaseFee)?;

    let expected_base_fee = calc_base_fee(config, parent);
    if base_fee != expected_base_fee {
        return Err(ConsensusError::InvalidBaseFee {
            have: base_fee,
            want: expected_base_fee,
            parent_base_fee: parent.base_fee.unwrap_or_default(),
            parent_gas_used: parent.gas_used,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ethers::types::H256;
    use test_case::test_case;

    use super::*;

    fn config() -> ChainConfig {
        ChainConfig {
            eip1559_block: Some(5),
            ..ChainConfig::default()
        }
    }

    fn header(
        number: u64,
        gas_limit: u64,
        gas_used: u64,
        base_fee: u64,
    ) -> Header {
        Header {
            number,
            hash: H256::zero(),
            gas_limit,
            gas_used,
            base_fee: Some(U256::from(base_fee)),
        }
    }

    #[test_case(20_000_000, 10_000_000, INITIAL_BASE_FEE ; "usage equals target")]
    #[test_case(20_000_000, 9_000_000, 987_500_000 ; "usage below target")]
    #[test_case(20_000_000, 11_000_000, 1_012_500_000 ; "usage above target")]
    fn calc_base_fee_post_fork(
        parent_gas_limit: u64,
        parent_gas_used: u64,
        expected: u64,
    ) {
        let parent =
            header(32, parent_gas_limit, parent_gas_used, INITIAL_BASE_FEE);

        assert_eq!(calc_base_fee(&config(), &parent), U256::from(expected));
    }

    #[test]
    fn calc_base_fee_before_fork() {
        let parent = header(3, 20_000_000, 20_000_000, 7);

        assert_eq!(
            calc_base_fee(&config(), &parent),
            U256::from(INITIAL_BASE_FEE)
        );
    }

    #[test]
    fn increase_is_at_least_one_wei() {
        // delta = 7 * 1 / 10_000_000 / 8 truncates to zero
        let parent = header(32, 20_000_000, 10_000_001, 7);

        assert_eq!(calc_base_fee(&config(), &parent), U256::from(8));
    }

    #[test]
    fn decrease_never_goes_negative() {
        let parent = header(32, 20_000_000, 0, 1);

        assert_eq!(calc_base_fee(&config(), &parent), U256::from(1));

        let parent = header(32, 20_000_000, 0, 0);

        assert_eq!(calc_base_fee(&config(), &parent), U256::zero());
    }

    #[test]
    fn recurrence_moves_in_the_direction_of_usage() {
        let config = config();

        for base_fee in [1u64, 7, 1_000, INITIAL_BASE_FEE, u64::MAX] {
            for gas_used in [0u64, 1, 9_999_999, 10_000_001, 20_000_000] {
                let parent = header(32, 20_000_000, gas_used, base_fee);
                let next = calc_base_fee(&config, &parent);
                let base_fee = U256::from(base_fee);

                if gas_used > 10_000_000 {
                    assert!(next > base_fee, "{gas_used} {base_fee} {next}");
                } else {
                    assert!(next <= base_fee, "{gas_used} {base_fee} {next}");
                }
            }
        }
    }

    #[test]
    fn empty_parent_lowers_base_fee_by_an_eighth() {
        let parent = header(32, 20_000_000, 0, INITIAL_BASE_FEE);

        assert_eq!(
            calc_base_fee(&config(), &parent),
            U256::from(INITIAL_BASE_FEE - INITIAL_BASE_FEE / 8)
        );
    }

    #[test]
    fn huge_base_fee_does_not_overflow() {
        let mut parent = header(32, 20_000_000, 20_000_000, 0);
        parent.base_fee = Some(U256::MAX / 2);

        let next = calc_base_fee(&config(), &parent);

        assert_eq!(next, U256::MAX / 2 + (U256::MAX / 2) / 8);
    }

    // Transitions from pre-fork to fork and fork to fork
    #[test_case(10_000_000, 4, 20_000_000, true ; "transition no change")]
    #[test_case(10_000_000, 4, 20_019_530, true ; "transition upper limit")]
    #[test_case(10_000_000, 4, 20_019_531, false ; "transition upper limit plus one")]
    #[test_case(10_000_000, 4, 19_980_470, true ; "transition lower limit")]
    #[test_case(10_000_000, 4, 19_980_469, false ; "transition lower limit minus one")]
    #[test_case(20_000_000, 5, 20_000_000, true ; "no change")]
    #[test_case(20_000_000, 5, 20_019_530, true ; "upper limit")]
    #[test_case(20_000_000, 5, 20_019_531, false ; "upper limit plus one")]
    #[test_case(20_000_000, 5, 19_980_470, true ; "lower limit")]
    #[test_case(20_000_000, 5, 19_980_469, false ; "lower limit minus one")]
    #[test_case(40_000_000, 5, 40_039_061, true ; "large upper limit")]
    #[test_case(40_000_000, 5, 40_039_062, false ; "large upper limit plus one")]
    #[test_case(40_000_000, 5, 39_960_939, true ; "large lower limit")]
    #[test_case(40_000_000, 5, 39_960_938, false ; "large lower limit minus one")]
    fn block_gas_limits(
        parent_gas_limit: u64,
        parent_number: u64,
        gas_limit: u64,
        ok: bool,
    ) {
        let parent = header(
            parent_number,
            parent_gas_limit,
            parent_gas_limit / 2,
            INITIAL_BASE_FEE,
        );
        let header = header(
            parent_number + 1,
            gas_limit,
            gas_limit / 2,
            INITIAL_BASE_FEE,
        );

        let result = verify_header(&config(), &parent, &header);

        assert_eq!(result.is_ok(), ok, "{result:?}");
    }

    #[test]
    fn gas_limit_bound_is_exclusive() {
        let parent_gas_limit = 10_240_000;
        let bound = parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR;

        assert!(verify_gas_limit(parent_gas_limit, parent_gas_limit + bound - 1)
            .is_ok());
        assert!(verify_gas_limit(parent_gas_limit, parent_gas_limit - bound + 1)
            .is_ok());

        let err =
            verify_gas_limit(parent_gas_limit, parent_gas_limit + bound)
                .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::InvalidGasLimit {
                have: parent_gas_limit + bound,
                want: parent_gas_limit,
                limit: bound - 1,
            }
        );
        assert!(verify_gas_limit(parent_gas_limit, parent_gas_limit - bound)
            .is_err());
    }

    #[test]
    fn gas_limit_below_minimum() {
        // Within the delta bound of 5002 / 1024 = 4, yet below the minimum
        let err = verify_gas_limit(5002, MIN_GAS_LIMIT - 1).unwrap_err();

        assert_eq!(
            err,
            ConsensusError::GasLimitBelowMinimum {
                have: MIN_GAS_LIMIT - 1,
                minimum: MIN_GAS_LIMIT,
            }
        );
    }

    #[test]
    fn missing_base_fee() {
        let parent = header(10, 20_000_000, 10_000_000, INITIAL_BASE_FEE);
        let mut child = header(11, 20_000_000, 0, INITIAL_BASE_FEE);
        child.base_fee = None;

        assert_eq!(
            verify_header(&config(), &parent, &child),
            Err(ConsensusError::MissingBaseFee)
        );
    }

    #[test]
    fn mismatching_base_fee() {
        let parent = header(10, 20_000_000, 11_000_000, INITIAL_BASE_FEE);
        let child = header(11, 20_000_000, 0, INITIAL_BASE_FEE);

        let err = verify_header(&config(), &parent, &child).unwrap_err();

        assert_eq!(
            err,
            ConsensusError::InvalidBaseFee {
                have: U256::from(INITIAL_BASE_FEE),
                want: U256::from(1_012_500_000u64),
                parent_base_fee: U256::from(INITIAL_BASE_FEE),
                parent_gas_used: 11_000_000,
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid baseFee: have 1000000000, want 1012500000, \
             parentBaseFee 1000000000, parentGasUsed 11000000"
        );
    }
}

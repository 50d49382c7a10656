//! Fixed-point liveness arithmetic.
//!
//! The ratio mirrors the staking contract's activity checker:
//! `delta * scale / elapsed`, floored, in exact integer arithmetic. Every
//! function here is total: a non-positive time window yields zero rather
//! than an error.

use serde::{Deserialize, Serialize};

use crate::LivenessParams;

/// Fixed-point scale used by the on-chain ratio (10^18).
pub const LIVENESS_SCALE: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Evaluation {
    pub delta_attestations: u64,
    pub elapsed_seconds: i64,
    pub liveness_ratio: u128,
    pub passes_liveness: bool,
    pub attestations_needed: u64,
}

#[must_use]
pub fn compute_ratio(delta_attestations: u64, elapsed_seconds: i64) -> u128 {
    compute_ratio_with_scale(delta_attestations, elapsed_seconds, LIVENESS_SCALE)
}

/// Floors `delta * scale / elapsed`. Returns 0 for `elapsed_seconds <= 0`.
///
/// A product that would overflow 128 bits saturates, which keeps the result
/// non-decreasing in `delta_attestations`. Validated params never reach it.
#[must_use]
pub fn compute_ratio_with_scale(
    delta_attestations: u64,
    elapsed_seconds: i64,
    scale: u128,
) -> u128 {
    let Some(elapsed) = positive_seconds(elapsed_seconds) else {
        return 0;
    };

    u128::from(delta_attestations).saturating_mul(scale) / elapsed
}

#[must_use]
pub fn passes(liveness_ratio: u128, liveness_threshold: u128) -> bool {
    liveness_ratio >= liveness_threshold
}

#[must_use]
pub fn required_additional(
    liveness_threshold: u128,
    elapsed_seconds: i64,
    delta_attestations: u64,
) -> u64 {
    required_additional_with_scale(
        liveness_threshold,
        elapsed_seconds,
        delta_attestations,
        LIVENESS_SCALE,
    )
}

/// Smallest `n` such that `delta + n` attestations reach the threshold over
/// the same window: `max(0, ceil(threshold * elapsed / scale) - delta)`.
///
/// Returns 0 when the window is empty or negative, since no projection is
/// possible there. The product saturates only for thresholds that
/// [`LivenessParams::validate`] rejects.
#[must_use]
pub fn required_additional_with_scale(
    liveness_threshold: u128,
    elapsed_seconds: i64,
    delta_attestations: u64,
    scale: u128,
) -> u64 {
    let Some(elapsed) = positive_seconds(elapsed_seconds) else {
        return 0;
    };
    if scale == 0 {
        return 0;
    }

    let target = liveness_threshold.saturating_mul(elapsed).div_ceil(scale);
    let needed = target.saturating_sub(u128::from(delta_attestations));
    u64::try_from(needed).unwrap_or(u64::MAX)
}

#[must_use]
pub fn evaluate(
    delta_attestations: u64,
    elapsed_seconds: i64,
    params: &LivenessParams,
) -> Evaluation {
    let liveness_ratio =
        compute_ratio_with_scale(delta_attestations, elapsed_seconds, params.scale);
    let passes_liveness = passes(liveness_ratio, params.liveness_threshold);
    let attestations_needed = if passes_liveness {
        0
    } else {
        required_additional_with_scale(
            params.liveness_threshold,
            elapsed_seconds,
            delta_attestations,
            params.scale,
        )
    };

    Evaluation {
        delta_attestations,
        elapsed_seconds,
        liveness_ratio,
        passes_liveness,
        attestations_needed,
    }
}

fn positive_seconds(elapsed_seconds: i64) -> Option<u128> {
    u128::try_from(elapsed_seconds)
        .ok()
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ONE_PER_DAY: u128 = 11_574_074_074_074;

    #[test]
    fn one_attestation_in_24h_meets_daily_threshold() {
        let ratio = compute_ratio(1, 86_400);
        assert_eq!(ratio, 11_574_074_074_074);
        assert!(passes(ratio, ONE_PER_DAY));
    }

    #[test]
    fn one_attestation_in_25h_falls_short_by_one() {
        let ratio = compute_ratio(1, 90_000);
        assert_eq!(ratio, 11_111_111_111_111);
        assert!(!passes(ratio, ONE_PER_DAY));
        assert_eq!(required_additional(ONE_PER_DAY, 90_000, 1), 1);
        assert!(passes(compute_ratio(2, 90_000), ONE_PER_DAY));
    }

    #[test]
    fn empty_or_negative_window_yields_zero() {
        assert_eq!(compute_ratio(10, 0), 0);
        assert_eq!(compute_ratio(10, -5), 0);
        assert_eq!(required_additional(ONE_PER_DAY, 0, 0), 0);
        assert_eq!(required_additional(ONE_PER_DAY, -3_600, 0), 0);
    }

    #[test]
    fn exact_multiple_does_not_overshoot() {
        // threshold * elapsed lands exactly on a multiple of the scale.
        let threshold = LIVENESS_SCALE / 100;
        assert_eq!(required_additional(threshold, 200, 0), 2);
        assert!(passes(compute_ratio(2, 200), threshold));
        assert!(!passes(compute_ratio(1, 200), threshold));
    }

    #[test]
    fn overflowing_product_saturates() {
        let ratio = compute_ratio_with_scale(u64::MAX, 1, u128::MAX);
        assert_eq!(ratio, u128::MAX);
        let needed = required_additional_with_scale(u128::MAX, i64::MAX, 0, 1);
        assert_eq!(needed, u64::MAX);
    }

    #[test]
    fn evaluate_reports_zero_needed_when_passing() {
        let params = LivenessParams::new(ONE_PER_DAY);
        let passing = evaluate(3, 86_400, &params);
        assert!(passing.passes_liveness);
        assert_eq!(passing.attestations_needed, 0);

        let failing = evaluate(0, 3 * 86_400, &params);
        assert!(!failing.passes_liveness);
        assert_eq!(failing.attestations_needed, 3);
        assert_eq!(failing.liveness_ratio, 0);
    }

    proptest! {
        #[test]
        fn prop_zero_window_is_zero(delta in any::<u64>()) {
            prop_assert_eq!(compute_ratio(delta, 0), 0);
        }

        #[test]
        fn prop_ratio_non_decreasing_in_delta(
            delta in 0u64..1_000_000_000,
            bump in 0u64..1_000_000,
            elapsed in 1i64..1_000_000_000,
        ) {
            prop_assert!(compute_ratio(delta, elapsed) <= compute_ratio(delta + bump, elapsed));
        }

        #[test]
        fn prop_passes_is_threshold_comparison(ratio in any::<u128>(), threshold in any::<u128>()) {
            prop_assert_eq!(passes(ratio, threshold), ratio >= threshold);
        }

        #[test]
        fn prop_required_additional_is_minimal(
            threshold in 1u128..1_000_000_000_000_000,
            elapsed in 1i64..100_000_000,
            delta in 0u64..10_000_000,
        ) {
            let needed = required_additional(threshold, elapsed, delta);
            prop_assert!(passes(compute_ratio(delta + needed, elapsed), threshold));
            if needed > 0 {
                prop_assert!(!passes(compute_ratio(delta + needed - 1, elapsed), threshold));
            }
        }
    }
}

//! Liveness accounting core for a staked service.
//!
//! Everything in this crate is deterministic and free of I/O:
//! - [`evaluator`] computes the fixed-point liveness ratio, pass/fail and the
//!   attestations still needed to pass.
//! - [`checkpoint`] derives checkpoints from snapshots and enforces the
//!   append-only history invariants.
//! - [`summary`] aggregates a history into first-to-last deltas.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

pub mod checkpoint;
pub mod evaluator;
pub mod summary;

pub use checkpoint::{Anomaly, Checkpoint, CheckpointHistory, ClampedField};
pub use evaluator::{
    compute_ratio, compute_ratio_with_scale, evaluate, passes, required_additional,
    required_additional_with_scale, Evaluation, LIVENESS_SCALE,
};
pub use summary::{summarize, HistorySummary};

const WEI_PER_CENT: u128 = 10_000_000_000_000_000;
const WEI_PER_TEN_THOUSANDTH: u128 = 100_000_000_000_000;
const SECONDS_PER_HOUR: f64 = 3_600.0;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LivenessError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("contract call error: {0}")]
    ContractCall(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum StakingState {
    Unstaked,
    Staked,
    Evicted,
    Unknown,
}

impl StakingState {
    /// Maps the staking contract's state code; codes outside `0..=2` are
    /// carried as [`StakingState::Unknown`].
    #[must_use]
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Unstaked,
            1 => Self::Staked,
            2 => Self::Evicted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Unstaked => Some(0),
            Self::Staked => Some(1),
            Self::Evicted => Some(2),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstaked => "Unstaked",
            Self::Staked => "Staked",
            Self::Evicted => "Evicted",
            Self::Unknown => "Unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Unstaked" => Some(Self::Unstaked),
            "Staked" => Some(Self::Staked),
            "Evicted" => Some(Self::Evicted),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl Display for StakingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ServiceIdentity {
    pub service_id: u64,
    pub multisig: String,
    pub staking_contract: String,
}

impl ServiceIdentity {
    /// Builds a validated identity.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] when the service id is zero or
    /// either address is not a `0x`-prefixed 20-byte hex string.
    pub fn new(
        service_id: u64,
        multisig: impl Into<String>,
        staking_contract: impl Into<String>,
    ) -> Result<Self, LivenessError> {
        let identity = Self {
            service_id,
            multisig: multisig.into(),
            staking_contract: staking_contract.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Validates the identity fields.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] for a zero service id or a
    /// malformed address.
    pub fn validate(&self) -> Result<(), LivenessError> {
        if self.service_id == 0 {
            return Err(LivenessError::Configuration(
                "service_id MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("multisig", self.multisig.as_str()),
            ("staking_contract", self.staking_contract.as_str()),
        ] {
            if !is_evm_address(value) {
                return Err(LivenessError::Configuration(format!(
                    "{name} MUST be a 0x-prefixed 20-byte hex address, got {value:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Per-deployment liveness constants. Different staking contracts use
/// different rates, so these are always supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct LivenessParams {
    pub liveness_threshold: u128,
    pub scale: u128,
}

impl LivenessParams {
    #[must_use]
    pub fn new(liveness_threshold: u128) -> Self {
        Self {
            liveness_threshold,
            scale: LIVENESS_SCALE,
        }
    }

    /// Validates threshold and scale bounds.
    ///
    /// Accepted values keep `threshold * elapsed` and `attestations * scale`
    /// exact in 128 bits for every `i64` window and `u64` count, so the
    /// evaluator's saturation is never reached with validated params.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] when either value is zero or
    /// too large for exact evaluation.
    pub fn validate(&self) -> Result<(), LivenessError> {
        if self.liveness_threshold == 0 {
            return Err(LivenessError::Configuration(
                "liveness_threshold MUST be >= 1".to_string(),
            ));
        }

        if self.scale == 0 {
            return Err(LivenessError::Configuration(
                "scale MUST be >= 1".to_string(),
            ));
        }

        let max_window = u128::from(i64::MAX.unsigned_abs());
        if self.liveness_threshold.checked_mul(max_window).is_none() {
            return Err(LivenessError::Configuration(format!(
                "liveness_threshold MUST be <= {}, got {}",
                u128::MAX / max_window,
                self.liveness_threshold
            )));
        }

        let max_count = u128::from(u64::MAX);
        if self.scale.checked_mul(max_count).is_none() {
            return Err(LivenessError::Configuration(format!(
                "scale MUST be <= {}, got {}",
                u128::MAX / max_count,
                self.scale
            )));
        }

        Ok(())
    }
}

/// One point-in-time observation of the staking and attestation contracts.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StakingSnapshot {
    pub timestamp: i64,
    pub staking_state: StakingState,
    pub onchain_baseline: u64,
    pub attestations_total: u64,
    pub stake_start_timestamp: i64,
    /// `None` when the reward query failed.
    pub accrued_rewards_wei: Option<u128>,
}

impl StakingSnapshot {
    #[must_use]
    pub fn elapsed_seconds(&self) -> i64 {
        self.timestamp.saturating_sub(self.stake_start_timestamp)
    }
}

/// Per-choice vote counts from the attestation tracker, ordered
/// `[For, Against, Abstain, ..]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct VotingStats {
    pub counts: Vec<u128>,
}

impl VotingStats {
    pub const LABELS: [&'static str; 3] = ["For", "Against", "Abstain"];

    /// Count for choice `index`; absent choices count as 0.
    #[must_use]
    pub fn count(&self, index: usize) -> u128 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Sum of the For, Against and Abstain counts.
    #[must_use]
    pub fn total(&self) -> u128 {
        self.counts
            .iter()
            .take(Self::LABELS.len())
            .fold(0, |acc, count| acc.saturating_add(*count))
    }
}

/// Readings shown alongside a live evaluation. Each figure is `None` when the
/// call that produces it failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct StakingDetails {
    /// Minimum deposit; the service stakes it once as security deposit and
    /// once as agent bond.
    pub min_staking_deposit_wei: Option<u128>,
    pub multisig_balance_wei: Option<u128>,
    /// Activity-checker nonce growth since stake start.
    pub multisig_nonce_delta: Option<u64>,
    /// The activity checker's own `isRatioPass` verdict.
    pub activity_checker_pass: Option<bool>,
    pub voting_stats: Option<VotingStats>,
}

#[must_use]
pub fn is_evm_address(value: &str) -> bool {
    let Some(body) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    else {
        return false;
    };

    body.len() == 40 && body.chars().all(|ch| ch.is_ascii_hexdigit())
}

/// Formats a wei amount as OLAS with two decimals, rounding half to even.
#[must_use]
pub fn format_wei_as_olas(wei: u128) -> String {
    let cents = round_half_even(wei, WEI_PER_CENT);
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Formats a wei amount as ETH with four decimals, rounding half to even.
#[must_use]
pub fn format_wei_as_eth(wei: u128) -> String {
    let units = round_half_even(wei, WEI_PER_TEN_THOUSANDTH);
    format!("{}.{:04}", units / 10_000, units % 10_000)
}

/// Signed variant of [`format_wei_as_olas`] for reward deltas.
#[must_use]
pub fn format_signed_wei_as_olas(wei: i128) -> String {
    let magnitude = format_wei_as_olas(wei.unsigned_abs());
    if wei < 0 && round_half_even(wei.unsigned_abs(), WEI_PER_CENT) != 0 {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}

fn round_half_even(value: u128, unit: u128) -> u128 {
    let quotient = value / unit;
    let remainder = value % unit;
    let half = unit / 2;

    if remainder > half || (remainder == half && quotient % 2 == 1) {
        quotient + 1
    } else {
        quotient
    }
}

/// Formats unix seconds as an RFC3339 UTC timestamp.
///
/// # Errors
/// Returns [`LivenessError::Validation`] when the timestamp is out of range
/// or formatting fails.
pub fn format_unix_timestamp(seconds: i64) -> Result<String, LivenessError> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|err| {
            LivenessError::Validation(format!("timestamp {seconds} out of range: {err}"))
        })?
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            LivenessError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hours_from_seconds(seconds: i64) -> f64 {
    seconds as f64 / SECONDS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    const MULTISIG: &str = "0x7E5A4eA25001a46133e423BAC3512EaB798fcB3B";
    const STAKING: &str = "0xeF662b5266db0AeFe55554c50cA6Ad25c1DA16fb";

    #[test]
    fn staking_state_codes_map_and_unknown_is_carried() {
        assert_eq!(StakingState::from_code(0), StakingState::Unstaked);
        assert_eq!(StakingState::from_code(1), StakingState::Staked);
        assert_eq!(StakingState::from_code(2), StakingState::Evicted);
        assert_eq!(StakingState::from_code(7), StakingState::Unknown);
        assert_eq!(StakingState::Staked.code(), Some(1));
        assert_eq!(StakingState::Unknown.code(), None);
        assert_eq!(StakingState::parse("Evicted"), Some(StakingState::Evicted));
        assert_eq!(StakingState::parse("evicted"), None);
    }

    #[test]
    fn staking_state_serializes_as_display_name() {
        let value = must_ok(serde_json::to_value(StakingState::Staked));
        assert_eq!(value, serde_json::json!("Staked"));
    }

    #[test]
    fn identity_rejects_zero_service_id() {
        let err = ServiceIdentity::new(0, MULTISIG, STAKING);
        assert!(matches!(err, Err(LivenessError::Configuration(_))));
    }

    #[test]
    fn identity_rejects_malformed_addresses() {
        assert!(ServiceIdentity::new(167, "", STAKING).is_err());
        assert!(ServiceIdentity::new(167, MULTISIG, "no_staking").is_err());
        assert!(ServiceIdentity::new(167, "0x1234", STAKING).is_err());
        let identity = must_ok(ServiceIdentity::new(167, MULTISIG, STAKING));
        assert_eq!(identity.service_id, 167);
    }

    #[test]
    fn params_require_positive_threshold_and_scale() {
        assert!(LivenessParams::new(0).validate().is_err());
        let mut params = LivenessParams::new(11_574_074_074_074);
        assert!(params.validate().is_ok());
        params.scale = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn params_reject_values_that_would_saturate() {
        assert!(LivenessParams::new(u128::MAX).validate().is_err());
        let largest = u128::MAX / u128::from(i64::MAX.unsigned_abs());
        assert!(LivenessParams::new(largest).validate().is_ok());
        assert!(LivenessParams::new(largest + 1).validate().is_err());

        let mut params = LivenessParams::new(11_574_074_074_074);
        params.scale = u128::MAX;
        assert!(matches!(
            params.validate(),
            Err(LivenessError::Configuration(_))
        ));
    }

    #[test]
    fn voting_stats_default_missing_choices_to_zero() {
        let stats = VotingStats {
            counts: vec![2, 1],
        };
        assert_eq!(stats.count(0), 2);
        assert_eq!(stats.count(2), 0);
        assert_eq!(stats.total(), 3);

        let extended = VotingStats {
            counts: vec![1, 1, 1, 9],
        };
        assert_eq!(extended.total(), 3);
    }

    #[test]
    fn eth_formatting_uses_four_places() {
        assert_eq!(format_wei_as_eth(0), "0.0000");
        assert_eq!(format_wei_as_eth(1_234_567_000_000_000_000), "1.2346");
        assert_eq!(format_wei_as_eth(50_000_000_000_000), "0.0000");
        assert_eq!(format_wei_as_eth(150_000_000_000_000), "0.0002");
    }

    #[test]
    fn snapshot_elapsed_may_be_negative() {
        let snapshot = StakingSnapshot {
            timestamp: 100,
            staking_state: StakingState::Staked,
            onchain_baseline: 0,
            attestations_total: 0,
            stake_start_timestamp: 160,
            accrued_rewards_wei: None,
        };
        assert_eq!(snapshot.elapsed_seconds(), -60);
    }

    #[test]
    fn wei_formatting_uses_two_places_and_half_even() {
        assert_eq!(format_wei_as_olas(0), "0.00");
        assert_eq!(format_wei_as_olas(1_000_000_000_000_000_000), "1.00");
        assert_eq!(format_wei_as_olas(1_234_000_000_000_000_000), "1.23");
        assert_eq!(format_wei_as_olas(5_000_000_000_000_000), "0.00");
        assert_eq!(format_wei_as_olas(15_000_000_000_000_000), "0.02");
        assert_eq!(format_wei_as_olas(15_000_000_000_000_001), "0.02");
        assert_eq!(format_wei_as_olas(25_000_000_000_000_000), "0.02");
        assert_eq!(format_signed_wei_as_olas(-2_500_000_000_000_000_000), "-2.50");
        assert_eq!(format_signed_wei_as_olas(-1), "0.00");
    }

    #[test]
    fn unix_timestamps_format_as_utc_rfc3339() {
        assert_eq!(
            must_ok(format_unix_timestamp(1_770_465_600)),
            "2026-02-07T12:00:00Z"
        );
        assert!(format_unix_timestamp(i64::MAX).is_err());
    }

    #[test]
    fn hours_are_fractional() {
        assert!((hours_from_seconds(90_000) - 25.0).abs() < f64::EPSILON);
        assert!((hours_from_seconds(5_400) - 1.5).abs() < f64::EPSILON);
    }
}

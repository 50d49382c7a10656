use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::evaluator::evaluate;
use crate::{
    format_unix_timestamp, format_wei_as_olas, hours_from_seconds, LivenessError, LivenessParams,
    StakingSnapshot, StakingState,
};

/// A chain reading that had to be clamped or could not be trusted as-is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    AttestationsBelowOnchainBaseline {
        attestations_total: u64,
        onchain_baseline: u64,
    },
    AttestationsBelowLocalBaseline {
        attestations_total: u64,
        local_baseline: u64,
    },
    TimestampBeforeStakeStart {
        timestamp: i64,
        stake_start_timestamp: i64,
    },
    /// A stored count or ratio was negative (older files never clamped) and
    /// was loaded as 0.
    NegativeValueClamped { field: ClampedField, value: i64 },
}

impl Anomaly {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AttestationsBelowOnchainBaseline { .. } => "attestations_below_onchain_baseline",
            Self::AttestationsBelowLocalBaseline { .. } => "attestations_below_local_baseline",
            Self::TimestampBeforeStakeStart { .. } => "timestamp_before_stake_start",
            Self::NegativeValueClamped { .. } => "negative_value_clamped",
        }
    }
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttestationsBelowOnchainBaseline {
                attestations_total,
                onchain_baseline,
            } => write!(
                f,
                "attestation count {attestations_total} is below the on-chain baseline \
                 {onchain_baseline}; delta clamped to 0"
            ),
            Self::AttestationsBelowLocalBaseline {
                attestations_total,
                local_baseline,
            } => write!(
                f,
                "attestation count {attestations_total} is below the local baseline \
                 {local_baseline}; delta clamped to 0"
            ),
            Self::TimestampBeforeStakeStart {
                timestamp,
                stake_start_timestamp,
            } => write!(
                f,
                "snapshot at {timestamp} predates stake start {stake_start_timestamp}; \
                 ratio reported as 0"
            ),
            Self::NegativeValueClamped { field, value } => {
                write!(f, "stored {} was {value}; clamped to 0", field.as_str())
            }
        }
    }
}

/// Checkpoint fields that older history files may hold as negative numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ClampedField {
    AttestationsSinceStake,
    AttestationsSinceBaseline,
    LivenessRatio,
}

impl ClampedField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttestationsSinceStake => "attestations_since_stake",
            Self::AttestationsSinceBaseline => "attestations_since_baseline",
            Self::LivenessRatio => "liveness_ratio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "StoredCheckpoint")]
pub struct Checkpoint {
    pub checkpoint_num: u64,
    pub timestamp: i64,
    pub datetime: String,
    pub hours_elapsed: f64,
    pub staking_state: StakingState,
    pub attestations_total: u64,
    pub attestations_since_stake: u64,
    pub attestations_since_baseline: u64,
    pub accrued_rewards_wei: Option<u128>,
    pub accrued_rewards_olas: Option<String>,
    pub liveness_ratio: u128,
    pub passes_liveness: bool,
    #[serde(default)]
    pub onchain_baseline_attestations: u64,
    #[serde(default)]
    pub stake_start_timestamp: i64,
    #[serde(default)]
    pub attestations_needed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<Anomaly>,
}

/// On-disk shape of a checkpoint. Counts and the ratio are read signed so
/// files whose deltas were never clamped still load.
#[derive(Deserialize)]
struct StoredCheckpoint {
    checkpoint_num: u64,
    timestamp: i64,
    datetime: String,
    hours_elapsed: f64,
    staking_state: StakingState,
    attestations_total: u64,
    attestations_since_stake: i128,
    attestations_since_baseline: i128,
    accrued_rewards_wei: Option<u128>,
    accrued_rewards_olas: Option<String>,
    liveness_ratio: i128,
    passes_liveness: bool,
    #[serde(default)]
    onchain_baseline_attestations: u64,
    #[serde(default)]
    stake_start_timestamp: i64,
    #[serde(default)]
    attestations_needed: u64,
    #[serde(default)]
    anomalies: Vec<Anomaly>,
}

fn clamp_stored(value: i128, field: ClampedField, anomalies: &mut Vec<Anomaly>) -> u128 {
    u128::try_from(value).unwrap_or_else(|_| {
        anomalies.push(Anomaly::NegativeValueClamped {
            field,
            value: i64::try_from(value).unwrap_or(i64::MIN),
        });
        0
    })
}

impl From<StoredCheckpoint> for Checkpoint {
    fn from(stored: StoredCheckpoint) -> Self {
        let mut anomalies = stored.anomalies;
        let since_stake = clamp_stored(
            stored.attestations_since_stake,
            ClampedField::AttestationsSinceStake,
            &mut anomalies,
        );
        let since_baseline = clamp_stored(
            stored.attestations_since_baseline,
            ClampedField::AttestationsSinceBaseline,
            &mut anomalies,
        );
        let liveness_ratio = clamp_stored(
            stored.liveness_ratio,
            ClampedField::LivenessRatio,
            &mut anomalies,
        );

        Self {
            checkpoint_num: stored.checkpoint_num,
            timestamp: stored.timestamp,
            datetime: stored.datetime,
            hours_elapsed: stored.hours_elapsed,
            staking_state: stored.staking_state,
            attestations_total: stored.attestations_total,
            attestations_since_stake: u64::try_from(since_stake).unwrap_or(u64::MAX),
            attestations_since_baseline: u64::try_from(since_baseline).unwrap_or(u64::MAX),
            accrued_rewards_wei: stored.accrued_rewards_wei,
            accrued_rewards_olas: stored.accrued_rewards_olas,
            liveness_ratio,
            passes_liveness: stored.passes_liveness,
            onchain_baseline_attestations: stored.onchain_baseline_attestations,
            stake_start_timestamp: stored.stake_start_timestamp,
            attestations_needed: stored.attestations_needed,
            anomalies,
        }
    }
}

/// Append-only checkpoint log plus the local observation baseline.
///
/// The baseline is seeded once, from the first checkpoint's attestation
/// total, and is independent of the on-chain baseline captured at stake
/// time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointHistory {
    pub baseline_attestations: Option<u64>,
    pub checkpoints: Vec<Checkpoint>,
}

impl CheckpointHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Checks the sequence-number and baseline invariants.
    ///
    /// # Errors
    /// Returns [`LivenessError::Validation`] when a checkpoint number does not
    /// match its position, or the baseline is missing while checkpoints exist.
    pub fn validate(&self) -> Result<(), LivenessError> {
        for (index, checkpoint) in self.checkpoints.iter().enumerate() {
            if usize::try_from(checkpoint.checkpoint_num).ok() != Some(index) {
                return Err(LivenessError::Validation(format!(
                    "checkpoint_num MUST equal its position: found {} at index {index}",
                    checkpoint.checkpoint_num
                )));
            }
        }

        if !self.checkpoints.is_empty() && self.baseline_attestations.is_none() {
            return Err(LivenessError::Validation(
                "baseline_attestations MUST be set once checkpoints exist".to_string(),
            ));
        }

        Ok(())
    }

    /// Derives the next checkpoint for `snapshot` without mutating the
    /// history. Ratio and pass/fail use the on-chain baseline delta; the local
    /// baseline delta is carried alongside it.
    ///
    /// # Errors
    /// Returns [`LivenessError::Validation`] when the snapshot timestamp
    /// cannot be rendered.
    pub fn derive_checkpoint(
        &self,
        snapshot: &StakingSnapshot,
        params: &LivenessParams,
    ) -> Result<Checkpoint, LivenessError> {
        let local_baseline = self
            .baseline_attestations
            .unwrap_or(snapshot.attestations_total);
        let mut anomalies = Vec::new();

        let attestations_since_stake = snapshot
            .attestations_total
            .checked_sub(snapshot.onchain_baseline)
            .unwrap_or_else(|| {
                anomalies.push(Anomaly::AttestationsBelowOnchainBaseline {
                    attestations_total: snapshot.attestations_total,
                    onchain_baseline: snapshot.onchain_baseline,
                });
                0
            });

        let attestations_since_baseline = snapshot
            .attestations_total
            .checked_sub(local_baseline)
            .unwrap_or_else(|| {
                anomalies.push(Anomaly::AttestationsBelowLocalBaseline {
                    attestations_total: snapshot.attestations_total,
                    local_baseline,
                });
                0
            });

        let elapsed_seconds = snapshot.elapsed_seconds();
        if elapsed_seconds < 0 {
            anomalies.push(Anomaly::TimestampBeforeStakeStart {
                timestamp: snapshot.timestamp,
                stake_start_timestamp: snapshot.stake_start_timestamp,
            });
        }

        let evaluation = evaluate(attestations_since_stake, elapsed_seconds, params);
        let checkpoint_num = u64::try_from(self.checkpoints.len()).map_err(|_| {
            LivenessError::Validation("checkpoint count exceeds u64 range".to_string())
        })?;

        Ok(Checkpoint {
            checkpoint_num,
            timestamp: snapshot.timestamp,
            datetime: format_unix_timestamp(snapshot.timestamp)?,
            hours_elapsed: hours_from_seconds(elapsed_seconds),
            staking_state: snapshot.staking_state,
            attestations_total: snapshot.attestations_total,
            attestations_since_stake,
            attestations_since_baseline,
            accrued_rewards_wei: snapshot.accrued_rewards_wei,
            accrued_rewards_olas: snapshot.accrued_rewards_wei.map(format_wei_as_olas),
            liveness_ratio: evaluation.liveness_ratio,
            passes_liveness: evaluation.passes_liveness,
            onchain_baseline_attestations: snapshot.onchain_baseline,
            stake_start_timestamp: snapshot.stake_start_timestamp,
            attestations_needed: evaluation.attestations_needed,
            anomalies,
        })
    }

    /// Appends a derived checkpoint, seeding the local baseline on the first
    /// append.
    ///
    /// # Errors
    /// Returns [`LivenessError::Validation`] when the checkpoint was derived
    /// against a different history length.
    pub fn append(&mut self, checkpoint: Checkpoint) -> Result<(), LivenessError> {
        if usize::try_from(checkpoint.checkpoint_num).ok() != Some(self.checkpoints.len()) {
            return Err(LivenessError::Validation(format!(
                "checkpoint_num {} does not follow history of length {}",
                checkpoint.checkpoint_num,
                self.checkpoints.len()
            )));
        }

        if self.baseline_attestations.is_none() {
            self.baseline_attestations = Some(checkpoint.attestations_total);
        }
        self.checkpoints.push(checkpoint);
        Ok(())
    }

    /// Decodes and validates a persisted history.
    ///
    /// # Errors
    /// Returns [`LivenessError::Persistence`] when the JSON cannot be decoded
    /// and [`LivenessError::Validation`] when the decoded history violates
    /// its invariants.
    pub fn from_json_str(raw: &str) -> Result<Self, LivenessError> {
        let history: Self = serde_json::from_str(raw).map_err(|err| {
            LivenessError::Persistence(format!("invalid checkpoint history JSON: {err}"))
        })?;
        history.validate()?;
        Ok(history)
    }

    /// Encodes the history as pretty JSON.
    ///
    /// # Errors
    /// Returns [`LivenessError::Persistence`] when serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, LivenessError> {
        serde_json::to_string_pretty(self).map_err(|err| {
            LivenessError::Persistence(format!("failed to serialize checkpoint history: {err}"))
        })
    }
}

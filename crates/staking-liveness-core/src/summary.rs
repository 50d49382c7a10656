use serde::{Deserialize, Serialize};

use crate::{CheckpointHistory, StakingState};

/// First-to-last deltas across a checkpoint history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistorySummary {
    pub checkpoint_count: usize,
    pub duration_hours: f64,
    pub net_new_attestations: i128,
    /// `None` when either endpoint has no reward reading.
    pub net_reward_delta_wei: Option<i128>,
    pub final_pass: bool,
    pub final_liveness_ratio: u128,
    pub final_staking_state: StakingState,
}

/// Summarizes a history; `None` for fewer than two checkpoints.
#[must_use]
pub fn summarize(history: &CheckpointHistory) -> Option<HistorySummary> {
    let [first, .., last] = history.checkpoints.as_slice() else {
        return None;
    };

    let net_reward_delta_wei = match (first.accrued_rewards_wei, last.accrued_rewards_wei) {
        (Some(start), Some(end)) => Some(signed_difference(end, start)),
        _ => None,
    };

    Some(HistorySummary {
        checkpoint_count: history.checkpoints.len(),
        duration_hours: last.hours_elapsed - first.hours_elapsed,
        net_new_attestations: i128::from(last.attestations_since_baseline)
            - i128::from(first.attestations_since_baseline),
        net_reward_delta_wei,
        final_pass: last.passes_liveness,
        final_liveness_ratio: last.liveness_ratio,
        final_staking_state: last.staking_state,
    })
}

fn signed_difference(end: u128, start: u128) -> i128 {
    if end >= start {
        i128::try_from(end - start).unwrap_or(i128::MAX)
    } else {
        i128::try_from(start - end).map_or(i128::MIN, |magnitude| -magnitude)
    }
}

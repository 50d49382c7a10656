//! Monitor operations over a checkpoint store and a chain collaborator.

use staking_liveness_chain::{DetailSource, SnapshotSource, TimeTravel};
use staking_liveness_core::{Checkpoint, LivenessError, LivenessParams, ServiceIdentity};
use staking_liveness_store_json::JsonCheckpointStore;
use tracing::{info, warn};

use crate::report::{CheckpointReport, StatusReport, STATUS_CONTRACT_VERSION};

const SECONDS_PER_HOUR: u64 = 3_600;

/// Fetches one snapshot and records it. Nothing is appended when the fetch
/// or the write fails.
///
/// # Errors
/// Returns the snapshot source's error, or a persistence error from the
/// store.
pub fn record_checkpoint(
    store: &mut JsonCheckpointStore,
    source: &impl SnapshotSource,
    identity: &ServiceIdentity,
    params: &LivenessParams,
) -> Result<Checkpoint, LivenessError> {
    let snapshot = source.fetch_snapshot(identity)?;
    store.record(&snapshot, params)
}

/// Advances chain time by `hours`, then records a checkpoint.
///
/// # Errors
/// Returns [`LivenessError::Validation`] for a zero or overflowing hour
/// count, otherwise the chain or store error.
pub fn advance_and_record<C>(
    store: &mut JsonCheckpointStore,
    chain: &C,
    identity: &ServiceIdentity,
    params: &LivenessParams,
    hours: u64,
) -> Result<Checkpoint, LivenessError>
where
    C: SnapshotSource + TimeTravel,
{
    if hours == 0 {
        return Err(LivenessError::Validation("hours MUST be >= 1".to_string()));
    }
    let seconds = hours
        .checked_mul(SECONDS_PER_HOUR)
        .ok_or_else(|| LivenessError::Validation(format!("{hours} hours overflows seconds")))?;

    chain.advance_time(seconds)?;
    info!(hours, seconds, "advanced time before checkpoint");
    record_checkpoint(store, chain, identity, params)
}

#[must_use]
pub fn generate_report(store: &JsonCheckpointStore) -> CheckpointReport {
    CheckpointReport::from_history(store.history())
}

/// Discards the recorded history.
///
/// # Errors
/// Returns a persistence error when the history file cannot be removed.
pub fn reset(store: &mut JsonCheckpointStore) -> Result<bool, LivenessError> {
    store.reset()
}

/// Evaluates the service against the current chain state without recording,
/// alongside the deposit, balance, activity and voting readings.
///
/// # Errors
/// Returns the snapshot or detail source's error.
pub fn status<S>(
    store: &JsonCheckpointStore,
    source: &S,
    identity: &ServiceIdentity,
    params: &LivenessParams,
) -> Result<StatusReport, LivenessError>
where
    S: SnapshotSource + DetailSource,
{
    let snapshot = source.fetch_snapshot(identity)?;
    let history = store.history();
    let evaluation = history.derive_checkpoint(&snapshot, params)?;
    let details = source.fetch_details(identity, snapshot.elapsed_seconds())?;

    if let Some(checker_pass) = details.activity_checker_pass {
        if checker_pass != evaluation.passes_liveness {
            warn!(
                service_id = identity.service_id,
                checker_pass,
                local_pass = evaluation.passes_liveness,
                "activity checker disagrees with the local liveness evaluation"
            );
        }
    }

    Ok(StatusReport {
        contract_version: STATUS_CONTRACT_VERSION.to_string(),
        service_id: identity.service_id,
        multisig: identity.multisig.clone(),
        staking_contract: identity.staking_contract.clone(),
        liveness_threshold: params.liveness_threshold,
        recorded_checkpoints: history.len(),
        baseline_attestations: history.baseline_attestations,
        evaluation,
        details,
    })
}

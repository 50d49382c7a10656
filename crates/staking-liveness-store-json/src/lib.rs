#![allow(clippy::missing_errors_doc)]

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use staking_liveness_core::{
    Anomaly, Checkpoint, CheckpointHistory, LivenessError, LivenessParams, StakingSnapshot,
};
use tracing::{info, warn};
use ulid::Ulid;

/// Default history file name, relative to the working directory.
pub const DEFAULT_HISTORY_FILE: &str = "staking_checkpoints.json";

/// Checkpoint history persisted as a single JSON document.
///
/// The in-memory history only changes after the new document has been
/// durably renamed into place.
#[derive(Debug)]
pub struct JsonCheckpointStore {
    path: PathBuf,
    history: CheckpointHistory,
}

impl JsonCheckpointStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LivenessError> {
        let path = path.into();
        let history = load_history(&path)?;
        Ok(Self { path, history })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn history(&self) -> &CheckpointHistory {
        &self.history
    }

    /// Re-reads the persisted history, replacing the cached copy.
    pub fn load(&mut self) -> Result<&CheckpointHistory, LivenessError> {
        self.history = load_history(&self.path)?;
        Ok(&self.history)
    }

    /// Derives, appends and persists one checkpoint for `snapshot`.
    pub fn record(
        &mut self,
        snapshot: &StakingSnapshot,
        params: &LivenessParams,
    ) -> Result<Checkpoint, LivenessError> {
        let checkpoint = self.history.derive_checkpoint(snapshot, params)?;

        let mut next = self.history.clone();
        next.append(checkpoint.clone())?;
        write_history(&self.path, &next)?;
        self.history = next;

        for anomaly in &checkpoint.anomalies {
            log_anomaly(checkpoint.checkpoint_num, anomaly);
        }
        info!(
            checkpoint_num = checkpoint.checkpoint_num,
            attestations_total = checkpoint.attestations_total,
            attestations_since_stake = checkpoint.attestations_since_stake,
            liveness_ratio = %checkpoint.liveness_ratio,
            passes_liveness = checkpoint.passes_liveness,
            path = %self.path.display(),
            "recorded checkpoint"
        );

        Ok(checkpoint)
    }

    /// Discards the persisted history. Returns whether a file was removed.
    pub fn reset(&mut self) -> Result<bool, LivenessError> {
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                return Err(LivenessError::Persistence(format!(
                    "failed to remove checkpoint history {}: {err}",
                    self.path.display()
                )))
            }
        };
        let discarded = self.history.len();
        self.history = CheckpointHistory::new();

        info!(
            path = %self.path.display(),
            removed,
            discarded,
            "reset checkpoint history"
        );
        Ok(removed)
    }
}

/// Reads a history file; a missing file is an empty history.
pub fn load_history(path: &Path) -> Result<CheckpointHistory, LivenessError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(CheckpointHistory::new()),
        Err(err) => {
            return Err(LivenessError::Persistence(format!(
                "failed to read checkpoint history {}: {err}",
                path.display()
            )))
        }
    };

    CheckpointHistory::from_json_str(&raw).map_err(|err| match err {
        LivenessError::Validation(message) => LivenessError::Persistence(format!(
            "checkpoint history {} is inconsistent: {message}",
            path.display()
        )),
        other => other,
    })
}

/// Writes the whole history to a sibling temp file, syncs it, then renames it
/// over `path`. A failed write leaves the previous file untouched.
pub fn write_history(path: &Path, history: &CheckpointHistory) -> Result<(), LivenessError> {
    let encoded = history.to_json_pretty()?;
    let persistence = |action: &str, target: &Path, err: std::io::Error| {
        LivenessError::Persistence(format!("failed to {action} {}: {err}", target.display()))
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| persistence("create directory", &parent, err))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_HISTORY_FILE);
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Ulid::new()));

    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(encoded.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(persistence("write checkpoint history", path, err));
    }

    Ok(())
}

fn log_anomaly(checkpoint_num: u64, anomaly: &Anomaly) {
    warn!(checkpoint_num, kind = anomaly.kind(), "{anomaly}");
}

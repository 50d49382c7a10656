//! `stakecheck` command surface.
//!
//! Hosts can embed the monitor through:
//! - [`run_cli`] for full parsed CLI execution against a live JSON-RPC node.
//! - [`run_command`] for executing a parsed [`Command`] against any chain
//!   collaborator, writing output to any sink.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use staking_liveness_chain::{DetailSource, RpcChainClient, SnapshotSource, TimeTravel};
use staking_liveness_store_json::{JsonCheckpointStore, DEFAULT_HISTORY_FILE};

pub mod config;
pub mod ops;
pub mod report;

pub use config::{ChainArgs, MonitorConfig};

#[derive(Debug, Parser)]
#[command(name = "stakecheck")]
#[command(about = "Staking liveness checkpoint monitor")]
pub struct Cli {
    /// Checkpoint history file.
    #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
    pub history: PathBuf,

    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Record the current chain state as a checkpoint.
    Checkpoint {
        #[arg(long)]
        json: bool,
    },
    /// Advance dev-node time by N hours, then record a checkpoint.
    Advance {
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        hours: u64,
        #[arg(long)]
        json: bool,
    },
    /// Print the recorded history and its summary.
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Discard the recorded history.
    Reset,
    /// Evaluate the current chain state without recording it.
    Status {
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    /// Whether the command talks to the chain and so needs full
    /// configuration.
    #[must_use]
    pub fn needs_chain(&self) -> bool {
        matches!(
            self,
            Self::Checkpoint { .. } | Self::Advance { .. } | Self::Status { .. }
        )
    }
}

/// Executes a parsed CLI against the configured JSON-RPC node.
///
/// # Errors
/// Returns an error when configuration is incomplete, the chain cannot be
/// read, or the history cannot be loaded or written.
pub fn run_cli(cli: Cli) -> Result<()> {
    let mut store = JsonCheckpointStore::open(&cli.history).with_context(|| {
        format!("failed to open checkpoint history {}", cli.history.display())
    })?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if !cli.command.needs_chain() {
        return run_offline_command(&cli.command, &mut store, &mut out);
    }

    let config = config::resolve(&cli.chain).context("invalid monitor configuration")?;
    let chain = RpcChainClient::connect(
        &config.rpc_url,
        config.rpc_timeout,
        &config.attestation_tracker,
    )
    .and_then(|client| client.with_activity_checker(&config.activity_checker))
    .context("failed to build chain client")?;
    run_command(&cli.command, &mut store, &chain, &config, &mut out)
}

/// Executes `command` against `chain`, writing human or JSON output to `out`.
///
/// # Errors
/// Returns an error when the chain read, persistence, or output fails.
pub fn run_command<C>(
    command: &Command,
    store: &mut JsonCheckpointStore,
    chain: &C,
    config: &MonitorConfig,
    out: &mut impl Write,
) -> Result<()>
where
    C: SnapshotSource + DetailSource + TimeTravel,
{
    match command {
        Command::Checkpoint { json } => {
            let checkpoint =
                ops::record_checkpoint(store, chain, &config.identity, &config.params)
                    .context("failed to record checkpoint")?;
            emit_checkpoint(out, &checkpoint, store, *json)
        }
        Command::Advance { hours, json } => {
            let checkpoint =
                ops::advance_and_record(store, chain, &config.identity, &config.params, *hours)
                    .with_context(|| format!("failed to advance {hours}h and record"))?;
            emit_checkpoint(out, &checkpoint, store, *json)
        }
        Command::Status { json } => {
            let status = ops::status(store, chain, &config.identity, &config.params)
                .context("failed to evaluate live status")?;
            if *json {
                emit_json(out, &status)
            } else {
                emit_text(out, |text| report::write_status(text, &status))
            }
        }
        Command::Report { .. } | Command::Reset => run_offline_command(command, store, out),
    }
}

fn run_offline_command(
    command: &Command,
    store: &mut JsonCheckpointStore,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Report { json } => {
            let history_report = ops::generate_report(store);
            if *json {
                emit_json(out, &history_report)
            } else {
                emit_text(out, |text| report::write_report(text, &history_report))
            }
        }
        Command::Reset => {
            let removed = ops::reset(store).context("failed to reset checkpoint history")?;
            if removed {
                writeln!(out, "Checkpoint history reset ({})", store.path().display())?;
            } else {
                writeln!(out, "No checkpoint history at {}", store.path().display())?;
            }
            Ok(())
        }
        other => anyhow::bail!("command {other:?} requires chain access"),
    }
}

fn emit_checkpoint(
    out: &mut impl Write,
    checkpoint: &staking_liveness_core::Checkpoint,
    store: &JsonCheckpointStore,
    json: bool,
) -> Result<()> {
    if json {
        return emit_json(out, checkpoint);
    }
    let title = format!("CHECKPOINT {}", checkpoint.checkpoint_num);
    emit_text(out, |text| {
        report::write_checkpoint(
            text,
            &title,
            checkpoint,
            store.history().baseline_attestations,
        )
    })
}

fn emit_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn emit_text(
    out: &mut impl Write,
    render: impl FnOnce(&mut String) -> std::fmt::Result,
) -> Result<()> {
    let mut text = String::new();
    render(&mut text).context("failed to render output")?;
    out.write_all(text.as_bytes())?;
    Ok(())
}

//! Text and JSON renderings of checkpoints and histories.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use staking_liveness_core::{
    format_signed_wei_as_olas, format_wei_as_eth, format_wei_as_olas, summarize, Checkpoint,
    CheckpointHistory, HistorySummary, StakingDetails, VotingStats,
};

pub const REPORT_CONTRACT_VERSION: &str = "checkpoint_report.v1";
pub const STATUS_CONTRACT_VERSION: &str = "staking_status.v1";

const RULE_WIDTH: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointReport {
    pub contract_version: String,
    pub baseline_attestations: Option<u64>,
    pub checkpoints: Vec<Checkpoint>,
    pub summary: Option<HistorySummary>,
}

impl CheckpointReport {
    #[must_use]
    pub fn from_history(history: &CheckpointHistory) -> Self {
        Self {
            contract_version: REPORT_CONTRACT_VERSION.to_string(),
            baseline_attestations: history.baseline_attestations,
            checkpoints: history.checkpoints.clone(),
            summary: summarize(history),
        }
    }
}

/// Live evaluation that was not recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub contract_version: String,
    pub service_id: u64,
    pub multisig: String,
    pub staking_contract: String,
    pub liveness_threshold: u128,
    pub recorded_checkpoints: usize,
    pub baseline_attestations: Option<u64>,
    pub evaluation: Checkpoint,
    pub details: StakingDetails,
}

fn pass_label(passes: bool) -> &'static str {
    if passes {
        "PASS"
    } else {
        "FAIL"
    }
}

fn rewards_label(checkpoint: &Checkpoint) -> &str {
    checkpoint.accrued_rewards_olas.as_deref().unwrap_or("n/a")
}

/// Writes one checkpoint as a labelled block.
///
/// # Errors
/// Propagates formatter errors.
pub fn write_checkpoint(
    out: &mut impl Write,
    title: &str,
    checkpoint: &Checkpoint,
    baseline_attestations: Option<u64>,
) -> fmt::Result {
    let rule = "=".repeat(60);
    writeln!(out, "{rule}")?;
    writeln!(out, "{title}")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Time:                    {}", checkpoint.datetime)?;
    writeln!(out, "Hours since stake:       {:.1}", checkpoint.hours_elapsed)?;
    writeln!(out, "Staking state:           {}", checkpoint.staking_state)?;
    writeln!(out, "Total attestations:      {}", checkpoint.attestations_total)?;
    writeln!(
        out,
        "  on-chain baseline:     {}",
        checkpoint.onchain_baseline_attestations
    )?;
    match baseline_attestations {
        Some(baseline) => writeln!(out, "  local baseline:        {baseline}")?,
        None => writeln!(out, "  local baseline:        (set on first record)")?,
    }
    writeln!(
        out,
        "Since stake:             {}",
        checkpoint.attestations_since_stake
    )?;
    writeln!(
        out,
        "Since local baseline:    {}",
        checkpoint.attestations_since_baseline
    )?;
    writeln!(out, "Accrued rewards:         {} OLAS", rewards_label(checkpoint))?;
    writeln!(out, "Liveness ratio:          {}", checkpoint.liveness_ratio)?;
    writeln!(
        out,
        "Liveness status:         {}",
        pass_label(checkpoint.passes_liveness)
    )?;
    if !checkpoint.passes_liveness && checkpoint.attestations_needed > 0 {
        writeln!(
            out,
            "Attestations needed:     {}",
            checkpoint.attestations_needed
        )?;
    }
    for anomaly in &checkpoint.anomalies {
        writeln!(out, "Anomaly:                 {anomaly}")?;
    }
    writeln!(out, "{rule}")
}

/// Writes the full history table and, with two or more checkpoints, the
/// first-to-last summary.
///
/// # Errors
/// Propagates formatter errors.
pub fn write_report(out: &mut impl Write, report: &CheckpointReport) -> fmt::Result {
    if report.checkpoints.is_empty() {
        return writeln!(out, "No checkpoints recorded yet");
    }

    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    writeln!(out, "STAKING CHECKPOINT REPORT")?;
    writeln!(out, "{rule}")?;
    match report.baseline_attestations {
        Some(baseline) => writeln!(out, "Local baseline attestations: {baseline}")?,
        None => writeln!(out, "Local baseline attestations: n/a")?,
    }
    writeln!(out, "{thin}")?;
    writeln!(
        out,
        "{:<4} {:<8} {:<10} {:<8} {:<8} {:<8} {:<16} {:<18} {:<8}",
        "CP", "Hours", "State", "Total", "Stake", "New", "Rewards (OLAS)", "Ratio", "Liveness"
    )?;
    writeln!(out, "{thin}")?;
    for checkpoint in &report.checkpoints {
        writeln!(
            out,
            "{:<4} {:<8.1} {:<10} {:<8} {:<8} {:<8} {:<16} {:<18} {:<8}",
            checkpoint.checkpoint_num,
            checkpoint.hours_elapsed,
            checkpoint.staking_state.as_str(),
            checkpoint.attestations_total,
            checkpoint.attestations_since_stake,
            checkpoint.attestations_since_baseline,
            rewards_label(checkpoint),
            checkpoint.liveness_ratio,
            pass_label(checkpoint.passes_liveness)
        )?;
    }
    writeln!(out, "{thin}")?;

    if let Some(summary) = &report.summary {
        let rewards = summary
            .net_reward_delta_wei
            .map_or_else(|| "n/a".to_string(), format_signed_wei_as_olas);
        writeln!(out)?;
        writeln!(out, "Summary:")?;
        writeln!(out, "  Duration:                {:.1} hours", summary.duration_hours)?;
        writeln!(out, "  New attestations:        {}", summary.net_new_attestations)?;
        writeln!(out, "  Rewards accrued:         {rewards} OLAS")?;
        writeln!(
            out,
            "  Final liveness status:   {}",
            pass_label(summary.final_pass)
        )?;
    }

    Ok(())
}

fn or_na<V>(value: Option<V>, render: impl FnOnce(V) -> String) -> String {
    value.map_or_else(|| "n/a".to_string(), render)
}

fn votes_label(stats: &VotingStats) -> String {
    format!(
        "{}/{}/{} (total {})",
        stats.count(0),
        stats.count(1),
        stats.count(2),
        stats.total()
    )
}

/// Writes a live evaluation together with the service it belongs to.
///
/// # Errors
/// Propagates formatter errors.
pub fn write_status(out: &mut impl Write, status: &StatusReport) -> fmt::Result {
    let details = &status.details;
    let deposit = or_na(details.min_staking_deposit_wei, format_wei_as_olas);

    writeln!(out, "Service:                 {}", status.service_id)?;
    writeln!(out, "Multisig:                {}", status.multisig)?;
    writeln!(out, "Staking contract:        {}", status.staking_contract)?;
    writeln!(out, "Liveness threshold:      {}", status.liveness_threshold)?;
    writeln!(
        out,
        "Recorded checkpoints:    {}",
        status.recorded_checkpoints
    )?;
    writeln!(out, "Staked (security deposit): {deposit} OLAS")?;
    writeln!(out, "Staked (agent bond):     {deposit} OLAS")?;
    writeln!(
        out,
        "Safe ETH balance:        {} ETH",
        or_na(details.multisig_balance_wei, format_wei_as_eth)
    )?;
    writeln!(
        out,
        "Num. txs current epoch:  {}",
        or_na(details.multisig_nonce_delta, |delta| delta.to_string())
    )?;
    writeln!(
        out,
        "Activity checker:        {}",
        or_na(details.activity_checker_pass, |pass| pass_label(pass).to_string())
    )?;
    writeln!(
        out,
        "Votes (For/Against/Abstain): {}",
        or_na(details.voting_stats.as_ref(), votes_label)
    )?;
    write_checkpoint(
        out,
        "LIVE STATUS (not recorded)",
        &status.evaluation,
        status.baseline_attestations,
    )
}

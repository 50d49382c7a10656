//! Monitor configuration: flags and environment first, then an optional
//! service `config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use staking_liveness_chain::{
    DEFAULT_ACTIVITY_CHECKER, DEFAULT_ATTESTATION_TRACKER, DEFAULT_RPC_TIMEOUT_MS,
};
use staking_liveness_core::{LivenessError, LivenessParams, ServiceIdentity};

/// One attestation per day at the contract's 10^18 scale.
pub const DEFAULT_LIVENESS_THRESHOLD: u128 = 11_574_074_074_074;

/// Placeholder the service tooling writes when no staking program is chosen.
const NO_STAKING: &str = "no_staking";

#[derive(Debug, Clone, Args)]
pub struct ChainArgs {
    /// JSON-RPC endpoint of the chain (or a forked dev node).
    #[arg(long, env = "BASE_LEDGER_RPC")]
    pub rpc_url: Option<String>,

    #[arg(long, env = "TEST_SERVICE_ID")]
    pub service_id: Option<u64>,

    #[arg(long, env = "TEST_MULTISIG")]
    pub multisig: Option<String>,

    #[arg(long, env = "STAKING_CONTRACT_ADDRESS")]
    pub staking_contract: Option<String>,

    #[arg(long, default_value = DEFAULT_ATTESTATION_TRACKER)]
    pub attestation_tracker: String,

    /// Activity checker asked for its own liveness verdict in `status`.
    #[arg(long, default_value = DEFAULT_ACTIVITY_CHECKER)]
    pub activity_checker: String,

    /// Minimum liveness ratio, scaled by 10^18.
    #[arg(long, default_value_t = DEFAULT_LIVENESS_THRESHOLD)]
    pub threshold: u128,

    #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_MS)]
    pub rpc_timeout_ms: u64,

    /// Service `config.json` used to fill values not given as flags.
    #[arg(long)]
    pub service_config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub rpc_url: String,
    pub identity: ServiceIdentity,
    pub params: LivenessParams,
    pub attestation_tracker: String,
    pub activity_checker: String,
    pub rpc_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceConfigFile {
    #[serde(default)]
    chain_configs: ChainConfigs,
}

#[derive(Debug, Default, Deserialize)]
struct ChainConfigs {
    #[serde(default)]
    base: BaseChainConfig,
}

#[derive(Debug, Default, Deserialize)]
struct BaseChainConfig {
    #[serde(default)]
    ledger_config: LedgerConfig,
    #[serde(default)]
    chain_data: ChainData,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerConfig {
    rpc: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChainData {
    /// Service token id; unminted services carry `-1`.
    token: Option<i64>,
    multisig: Option<String>,
    #[serde(default)]
    user_params: UserParams,
}

#[derive(Debug, Default, Deserialize)]
struct UserParams {
    staking_program_id: Option<String>,
}

fn load_service_config(path: &Path) -> Result<BaseChainConfig, LivenessError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        LivenessError::Configuration(format!(
            "failed to read service config {}: {err}",
            path.display()
        ))
    })?;
    let parsed: ServiceConfigFile = serde_json::from_str(&raw).map_err(|err| {
        LivenessError::Configuration(format!(
            "invalid service config {}: {err}",
            path.display()
        ))
    })?;
    Ok(parsed.chain_configs.base)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolves flags, environment and the optional service config into a
/// validated [`MonitorConfig`].
///
/// # Errors
/// Returns [`LivenessError::Configuration`] naming every missing value, or
/// the first invalid one.
pub fn resolve(args: &ChainArgs) -> Result<MonitorConfig, LivenessError> {
    let file = match &args.service_config {
        Some(path) => load_service_config(path)?,
        None => BaseChainConfig::default(),
    };

    let rpc_url = non_empty(args.rpc_url.clone()).or_else(|| non_empty(file.ledger_config.rpc));
    let service_id = args.service_id.or_else(|| {
        file.chain_data
            .token
            .and_then(|token| u64::try_from(token).ok())
            .filter(|token| *token > 0)
    });
    let multisig = non_empty(args.multisig.clone()).or_else(|| non_empty(file.chain_data.multisig));
    let staking_contract = non_empty(args.staking_contract.clone())
        .or_else(|| non_empty(file.chain_data.user_params.staking_program_id))
        .filter(|value| value != NO_STAKING);

    let mut missing = Vec::new();
    if rpc_url.is_none() {
        missing.push("rpc url (--rpc-url / BASE_LEDGER_RPC)");
    }
    if service_id.is_none() {
        missing.push("service id (--service-id / TEST_SERVICE_ID)");
    }
    if multisig.is_none() {
        missing.push("multisig (--multisig / TEST_MULTISIG)");
    }
    if staking_contract.is_none() {
        missing.push("staking contract (--staking-contract / STAKING_CONTRACT_ADDRESS)");
    }

    let (Some(rpc_url), Some(service_id), Some(multisig), Some(staking_contract)) =
        (rpc_url, service_id, multisig, staking_contract)
    else {
        return Err(LivenessError::Configuration(format!(
            "missing required configuration: {}",
            missing.join(", ")
        )));
    };

    let identity = ServiceIdentity::new(service_id, multisig, staking_contract)?;
    let params = LivenessParams::new(args.threshold);
    params.validate()?;

    if args.rpc_timeout_ms == 0 {
        return Err(LivenessError::Configuration(
            "rpc timeout MUST be >= 1ms".to_string(),
        ));
    }

    Ok(MonitorConfig {
        rpc_url,
        identity,
        params,
        attestation_tracker: args.attestation_tracker.clone(),
        activity_checker: args.activity_checker.clone(),
        rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
    })
}

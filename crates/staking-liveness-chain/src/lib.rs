//! Chain-facing collaborators: snapshot acquisition, status details and
//! dev-node time travel.

#![allow(clippy::missing_errors_doc)]

use serde_json::{json, Value};
use staking_liveness_core::{
    LivenessError, ServiceIdentity, StakingDetails, StakingSnapshot, StakingState, VotingStats,
};
use tracing::{info, warn};

pub mod abi;
pub mod rpc;

pub use abi::ServiceInfo;
pub use rpc::{HttpRpcTransport, RpcTransport, DEFAULT_RPC_TIMEOUT_MS};

/// Attestation tracker deployed alongside the staking contracts on Base.
pub const DEFAULT_ATTESTATION_TRACKER: &str = "0x9BC8c713a159a028aC5590ffE42DaF0d9A6467AC";
/// Activity checker the staking contract consults for its liveness verdict.
pub const DEFAULT_ACTIVITY_CHECKER: &str = "0x747262cC12524C571e08faCb6E6994EF2E3B97ab";

pub trait SnapshotSource {
    /// Reads one point-in-time snapshot for `identity`.
    ///
    /// # Errors
    /// Returns [`LivenessError::Connectivity`] when the chain is unreachable
    /// and [`LivenessError::ContractCall`] when a required read fails.
    fn fetch_snapshot(&self, identity: &ServiceIdentity) -> Result<StakingSnapshot, LivenessError>;
}

pub trait DetailSource {
    /// Reads the figures shown next to a live evaluation. `elapsed_seconds`
    /// is the window the activity checker is asked to judge.
    ///
    /// # Errors
    /// Returns [`LivenessError::Connectivity`] when the chain is unreachable.
    /// A failed contract call only leaves its own figure unset.
    fn fetch_details(
        &self,
        identity: &ServiceIdentity,
        elapsed_seconds: i64,
    ) -> Result<StakingDetails, LivenessError>;
}

pub trait TimeTravel {
    /// Moves the chain clock forward and mines a block so the new time is
    /// observable.
    ///
    /// # Errors
    /// Returns an error when the node rejects or cannot serve the request.
    fn advance_time(&self, seconds: u64) -> Result<(), LivenessError>;
}

/// Reads staking and attestation contracts over JSON-RPC.
#[derive(Debug)]
pub struct RpcChainClient<T = HttpRpcTransport> {
    transport: T,
    attestation_tracker: String,
    activity_checker: String,
}

impl RpcChainClient<HttpRpcTransport> {
    /// Connects to an HTTP JSON-RPC endpoint.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] for a malformed URL or
    /// tracker address.
    pub fn connect(
        rpc_url: &str,
        timeout: std::time::Duration,
        attestation_tracker: &str,
    ) -> Result<Self, LivenessError> {
        let transport = HttpRpcTransport::new(rpc_url, timeout)?;
        Self::with_transport(transport, attestation_tracker)
    }
}

impl<T: RpcTransport> RpcChainClient<T> {
    /// Wraps an existing transport.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] when the tracker address is
    /// malformed.
    pub fn with_transport(transport: T, attestation_tracker: &str) -> Result<Self, LivenessError> {
        if !staking_liveness_core::is_evm_address(attestation_tracker) {
            return Err(LivenessError::Configuration(format!(
                "attestation tracker MUST be a 20-byte hex address, got {attestation_tracker:?}"
            )));
        }

        Ok(Self {
            transport,
            attestation_tracker: attestation_tracker.to_string(),
            activity_checker: DEFAULT_ACTIVITY_CHECKER.to_string(),
        })
    }

    /// Points the `isRatioPass` cross-check at another activity checker.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] when the address is malformed.
    pub fn with_activity_checker(mut self, activity_checker: &str) -> Result<Self, LivenessError> {
        if !staking_liveness_core::is_evm_address(activity_checker) {
            return Err(LivenessError::Configuration(format!(
                "activity checker MUST be a 20-byte hex address, got {activity_checker:?}"
            )));
        }
        self.activity_checker = activity_checker.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn eth_call(&self, to: &str, data: &str) -> Result<Vec<u8>, LivenessError> {
        let result = self
            .transport
            .call("eth_call", json!([{"to": to, "data": data}, "latest"]))?;
        let raw = result.as_str().ok_or_else(|| {
            LivenessError::ContractCall(format!("eth_call returned non-string result: {result}"))
        })?;
        abi::decode_hex(raw)
    }

    fn call_with_service_id(
        &self,
        identity: &ServiceIdentity,
        signature: &str,
    ) -> Result<Vec<u8>, LivenessError> {
        let data = abi::encode_call(
            signature,
            &[abi::encode_uint256(u128::from(identity.service_id))],
        );
        self.eth_call(&identity.staking_contract, &data)
    }

    pub fn staking_state(&self, identity: &ServiceIdentity) -> Result<StakingState, LivenessError> {
        let data = self.call_with_service_id(identity, abi::GET_STAKING_STATE)?;
        let code = abi::decode_uint256(&data)?;
        Ok(u64::try_from(code).map_or(StakingState::Unknown, StakingState::from_code))
    }

    pub fn service_info(&self, identity: &ServiceIdentity) -> Result<ServiceInfo, LivenessError> {
        let data = self.call_with_service_id(identity, abi::GET_SERVICE_INFO)?;
        abi::decode_service_info(&data)
    }

    pub fn accrued_reward(&self, identity: &ServiceIdentity) -> Result<u128, LivenessError> {
        let data = self.call_with_service_id(identity, abi::CALCULATE_STAKING_REWARD)?;
        abi::decode_uint256(&data)
    }

    pub fn attestation_count(&self, multisig: &str) -> Result<u64, LivenessError> {
        let data = abi::encode_call(abi::GET_NUM_ATTESTATIONS, &[abi::encode_address(multisig)?]);
        let result = self.eth_call(&self.attestation_tracker, &data)?;
        abi::word_to_u64(&abi::word_at(&result, 0)?)
    }

    pub fn min_staking_deposit(&self, identity: &ServiceIdentity) -> Result<u128, LivenessError> {
        let data = self.eth_call(
            &identity.staking_contract,
            &abi::encode_call(abi::MIN_STAKING_DEPOSIT, &[]),
        )?;
        abi::decode_uint256(&data)
    }

    pub fn voting_stats(&self, multisig: &str) -> Result<VotingStats, LivenessError> {
        let data = abi::encode_call(abi::GET_VOTING_STATS, &[abi::encode_address(multisig)?]);
        let result = self.eth_call(&self.attestation_tracker, &data)?;
        Ok(VotingStats {
            counts: abi::decode_uint256_array(&result)?,
        })
    }

    pub fn multisig_nonces(&self, multisig: &str) -> Result<Vec<u128>, LivenessError> {
        let data = abi::encode_call(abi::GET_MULTISIG_NONCES, &[abi::encode_address(multisig)?]);
        let result = self.eth_call(&self.activity_checker, &data)?;
        abi::decode_uint256_array(&result)
    }

    /// Asks the activity checker whether the nonce growth from `last` to
    /// `current` over `elapsed_seconds` meets its liveness ratio.
    pub fn ratio_pass(
        &self,
        current: &[u128],
        last: &[u128],
        elapsed_seconds: u64,
    ) -> Result<bool, LivenessError> {
        let args = abi::encode_ratio_pass_args(current, last, u128::from(elapsed_seconds));
        let result = self.eth_call(
            &self.activity_checker,
            &abi::encode_call(abi::IS_RATIO_PASS, &args),
        )?;
        abi::decode_bool(&result)
    }

    pub fn balance(&self, address: &str) -> Result<u128, LivenessError> {
        let balance = self
            .transport
            .call("eth_getBalance", json!([address, "latest"]))?;
        rpc::parse_wide_quantity(&balance)
    }

    pub fn latest_block_timestamp(&self) -> Result<i64, LivenessError> {
        let block = self
            .transport
            .call("eth_getBlockByNumber", json!(["latest", false]))?;
        let timestamp = block.get("timestamp").ok_or_else(|| {
            LivenessError::Connectivity("latest block has no timestamp".to_string())
        })?;
        i64::try_from(rpc::parse_quantity(timestamp)?).map_err(|_| {
            LivenessError::Connectivity(format!("block timestamp out of range: {timestamp}"))
        })
    }
}

impl<T: RpcTransport> SnapshotSource for RpcChainClient<T> {
    fn fetch_snapshot(&self, identity: &ServiceIdentity) -> Result<StakingSnapshot, LivenessError> {
        let staking_state = optional(identity, "staking state", self.staking_state(identity))?
            .unwrap_or(StakingState::Unknown);

        let info = self.service_info(identity)?;
        if !info.multisig.eq_ignore_ascii_case(&identity.multisig) {
            warn!(
                service_id = identity.service_id,
                configured = %identity.multisig,
                onchain = %info.multisig,
                "configured multisig differs from the staking contract's record"
            );
        }

        let attestations_total = self.attestation_count(&identity.multisig)?;

        let accrued_rewards_wei =
            optional(identity, "accrued reward", self.accrued_reward(identity))?;

        let timestamp = self.latest_block_timestamp()?;

        Ok(StakingSnapshot {
            timestamp,
            staking_state,
            onchain_baseline: info.attestation_baseline(),
            attestations_total,
            stake_start_timestamp: info.ts_start,
            accrued_rewards_wei,
        })
    }
}

impl<T: RpcTransport> DetailSource for RpcChainClient<T> {
    fn fetch_details(
        &self,
        identity: &ServiceIdentity,
        elapsed_seconds: i64,
    ) -> Result<StakingDetails, LivenessError> {
        let min_staking_deposit_wei = optional(
            identity,
            "minimum staking deposit",
            self.min_staking_deposit(identity),
        )?;
        let multisig_balance_wei =
            optional(identity, "multisig balance", self.balance(&identity.multisig))?;
        let voting_stats =
            optional(identity, "voting stats", self.voting_stats(&identity.multisig))?;

        let current = optional(
            identity,
            "activity checker nonces",
            self.multisig_nonces(&identity.multisig),
        )?;
        let last = optional(identity, "service info", self.service_info(identity))?
            .map(|info| info.nonces.into_iter().map(u128::from).collect::<Vec<_>>());

        let (multisig_nonce_delta, activity_checker_pass) = match (current, last) {
            (Some(current), Some(last)) => {
                let delta = match (current.first(), last.first()) {
                    (Some(now), Some(then)) => u64::try_from(now.saturating_sub(*then)).ok(),
                    _ => None,
                };
                let pass = match u64::try_from(elapsed_seconds) {
                    Ok(elapsed) if elapsed > 0 => optional(
                        identity,
                        "activity checker verdict",
                        self.ratio_pass(&current, &last, elapsed),
                    )?,
                    _ => None,
                };
                (delta, pass)
            }
            _ => (None, None),
        };

        Ok(StakingDetails {
            min_staking_deposit_wei,
            multisig_balance_wei,
            multisig_nonce_delta,
            activity_checker_pass,
            voting_stats,
        })
    }
}

/// Keeps a contract-call failure local: the value becomes `None` and a
/// warning is logged. Every other error propagates.
fn optional<V>(
    identity: &ServiceIdentity,
    what: &str,
    result: Result<V, LivenessError>,
) -> Result<Option<V>, LivenessError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(LivenessError::ContractCall(reason)) => {
            warn!(service_id = identity.service_id, %reason, "{what} unavailable");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl<T: RpcTransport> TimeTravel for RpcChainClient<T> {
    fn advance_time(&self, seconds: u64) -> Result<(), LivenessError> {
        self.transport.call("evm_increaseTime", json!([seconds]))?;
        self.transport.call("evm_mine", Value::Array(Vec::new()))?;
        info!(seconds, "advanced chain time");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn must<T>(result: Result<T, LivenessError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    const MULTISIG: &str = "0x7E5A4eA25001a46133e423BAC3512EaB798fcB3B";
    const STAKING: &str = "0xeF662b5266db0AeFe55554c50cA6Ad25c1DA16fb";

    /// Answers `eth_call` by selector and records every other method.
    #[derive(Default)]
    struct CannedTransport {
        calls: BTreeMap<String, Result<Value, LivenessError>>,
        block_timestamp: Option<&'static str>,
        balance: Option<&'static str>,
        log: RefCell<Vec<(String, Value)>>,
    }

    impl CannedTransport {
        fn answer(mut self, signature: &str, words: &[abi::Word]) -> Self {
            self.calls.insert(
                hex::encode(abi::selector(signature)),
                Ok(Value::String(format!("0x{}", hex::encode(words.concat())))),
            );
            self
        }

        fn fail(mut self, signature: &str, err: LivenessError) -> Self {
            self.calls.insert(hex::encode(abi::selector(signature)), Err(err));
            self
        }
    }

    impl RpcTransport for CannedTransport {
        fn call(&self, method: &str, params: Value) -> Result<Value, LivenessError> {
            self.log.borrow_mut().push((method.to_string(), params.clone()));
            match method {
                "eth_call" => {
                    let data = params[0]["data"].as_str().unwrap_or_default();
                    let selector = data.get(2..10).unwrap_or_default();
                    self.calls.get(selector).cloned().unwrap_or_else(|| {
                        Err(LivenessError::ContractCall(format!("no canned answer for {selector}")))
                    })
                }
                "eth_getBlockByNumber" => match self.block_timestamp {
                    Some(timestamp) => Ok(json!({"number": "0x10", "timestamp": timestamp})),
                    None => Err(LivenessError::Connectivity("connection refused".to_string())),
                },
                "eth_getBalance" => match self.balance {
                    Some(balance) => Ok(json!(balance)),
                    None => Err(LivenessError::ContractCall("method not supported".to_string())),
                },
                _ => Ok(Value::Null),
            }
        }
    }

    fn service_info_words(nonces: &[u128], ts_start: u128) -> Vec<abi::Word> {
        let mut words = vec![
            abi::encode_uint256(0x20),
            must(abi::encode_address(MULTISIG)),
            must(abi::encode_address(STAKING)),
            abi::encode_uint256(0x80),
            abi::encode_uint256(ts_start),
            abi::encode_uint256(nonces.len() as u128),
        ];
        words.extend(nonces.iter().map(|nonce| abi::encode_uint256(*nonce)));
        words
    }

    fn healthy_transport() -> CannedTransport {
        CannedTransport {
            block_timestamp: Some("0x6985f4a0"),
            ..CannedTransport::default()
        }
        .answer(abi::GET_STAKING_STATE, &[abi::encode_uint256(1)])
        .answer(abi::GET_SERVICE_INFO, &service_info_words(&[4, 40], 1_770_300_192))
        .answer(abi::GET_NUM_ATTESTATIONS, &[abi::encode_uint256(41)])
        .answer(abi::CALCULATE_STAKING_REWARD, &[abi::encode_uint256(2_500_000_000_000_000_000)])
    }

    fn array_words(values: &[u128]) -> Vec<abi::Word> {
        let mut words = vec![abi::encode_uint256(0x20), abi::encode_uint256(values.len() as u128)];
        words.extend(values.iter().map(|value| abi::encode_uint256(*value)));
        words
    }

    fn detailed_transport() -> CannedTransport {
        CannedTransport {
            balance: Some("0x1bc16d674ec80000"),
            ..healthy_transport()
        }
        .answer(abi::MIN_STAKING_DEPOSIT, &[abi::encode_uint256(50_000_000_000_000_000_000)])
        .answer(abi::GET_VOTING_STATS, &array_words(&[5, 1, 0]))
        .answer(abi::GET_MULTISIG_NONCES, &array_words(&[7, 45]))
        .answer(abi::IS_RATIO_PASS, &[abi::encode_uint256(1)])
    }

    fn client(transport: CannedTransport) -> RpcChainClient<CannedTransport> {
        must(RpcChainClient::with_transport(
            transport,
            DEFAULT_ATTESTATION_TRACKER,
        ))
    }

    fn identity() -> ServiceIdentity {
        must(ServiceIdentity::new(167, MULTISIG, STAKING))
    }

    #[test]
    fn snapshot_combines_all_reads() {
        let snapshot = must(client(healthy_transport()).fetch_snapshot(&identity()));
        assert_eq!(
            snapshot,
            StakingSnapshot {
                timestamp: 1_770_386_592,
                staking_state: StakingState::Staked,
                onchain_baseline: 40,
                attestations_total: 41,
                stake_start_timestamp: 1_770_300_192,
                accrued_rewards_wei: Some(2_500_000_000_000_000_000),
            }
        );
        assert_eq!(snapshot.elapsed_seconds(), 86_400);
    }

    #[test]
    fn calls_target_the_right_contracts() {
        let chain = client(healthy_transport());
        must(chain.fetch_snapshot(&identity()));

        let log = chain.transport().log.borrow();
        let targets: Vec<(&str, &str)> = log
            .iter()
            .filter(|(method, _)| method == "eth_call")
            .map(|(_, params)| {
                (
                    params[0]["data"].as_str().unwrap_or_default().get(2..10).unwrap_or_default(),
                    params[0]["to"].as_str().unwrap_or_default(),
                )
            })
            .collect();
        assert!(targets.contains(&("9d5083df", DEFAULT_ATTESTATION_TRACKER)));
        assert!(targets.contains(&("fd0bba8c", STAKING)));
        assert!(targets.contains(&("82a8ea58", STAKING)));
    }

    #[test]
    fn reward_revert_is_reported_as_unavailable() {
        let transport = healthy_transport().fail(
            abi::CALCULATE_STAKING_REWARD,
            LivenessError::ContractCall("execution reverted".to_string()),
        );
        let snapshot = must(client(transport).fetch_snapshot(&identity()));
        assert_eq!(snapshot.accrued_rewards_wei, None);
        assert_eq!(snapshot.attestations_total, 41);
    }

    #[test]
    fn staking_state_revert_degrades_to_unknown() {
        let transport = healthy_transport().fail(
            abi::GET_STAKING_STATE,
            LivenessError::ContractCall("execution reverted".to_string()),
        );
        let snapshot = must(client(transport).fetch_snapshot(&identity()));
        assert_eq!(snapshot.staking_state, StakingState::Unknown);
    }

    #[test]
    fn out_of_range_state_code_is_unknown() {
        let transport =
            healthy_transport().answer(abi::GET_STAKING_STATE, &[abi::encode_uint256(9)]);
        let snapshot = must(client(transport).fetch_snapshot(&identity()));
        assert_eq!(snapshot.staking_state, StakingState::Unknown);
    }

    #[test]
    fn attestation_count_failure_is_fatal() {
        let transport = healthy_transport().fail(
            abi::GET_NUM_ATTESTATIONS,
            LivenessError::ContractCall("execution reverted".to_string()),
        );
        let result = client(transport).fetch_snapshot(&identity());
        assert!(matches!(result, Err(LivenessError::ContractCall(_))));
    }

    #[test]
    fn service_info_abi_mismatch_is_fatal() {
        let transport =
            healthy_transport().answer(abi::GET_SERVICE_INFO, &[abi::encode_uint256(1)]);
        let result = client(transport).fetch_snapshot(&identity());
        assert!(matches!(result, Err(LivenessError::ContractCall(_))));
    }

    #[test]
    fn connectivity_failure_is_not_masked() {
        let transport = healthy_transport().fail(
            abi::CALCULATE_STAKING_REWARD,
            LivenessError::Connectivity("connection reset".to_string()),
        );
        let result = client(transport).fetch_snapshot(&identity());
        assert!(matches!(result, Err(LivenessError::Connectivity(_))));

        let no_block = CannedTransport {
            block_timestamp: None,
            ..healthy_transport()
        };
        let result = client(no_block).fetch_snapshot(&identity());
        assert!(matches!(result, Err(LivenessError::Connectivity(_))));
    }

    #[test]
    fn advance_time_increases_then_mines() {
        let chain = client(healthy_transport());
        must(chain.advance_time(3_600));

        let log = chain.transport().log.borrow();
        let methods: Vec<&str> = log.iter().map(|(method, _)| method.as_str()).collect();
        assert_eq!(methods, vec!["evm_increaseTime", "evm_mine"]);
        assert_eq!(log[0].1, json!([3_600]));
    }

    #[test]
    fn tracker_address_is_validated() {
        let result = RpcChainClient::with_transport(CannedTransport::default(), "0x123");
        assert!(matches!(result, Err(LivenessError::Configuration(_))));

        let checker = client(CannedTransport::default()).with_activity_checker("no_checker");
        assert!(matches!(checker, Err(LivenessError::Configuration(_))));
    }

    #[test]
    fn details_combine_all_reads() {
        let details = must(client(detailed_transport()).fetch_details(&identity(), 86_400));
        assert_eq!(
            details,
            StakingDetails {
                min_staking_deposit_wei: Some(50_000_000_000_000_000_000),
                multisig_balance_wei: Some(2_000_000_000_000_000_000),
                multisig_nonce_delta: Some(3),
                activity_checker_pass: Some(true),
                voting_stats: Some(VotingStats {
                    counts: vec![5, 1, 0],
                }),
            }
        );
    }

    #[test]
    fn ratio_pass_sends_current_and_stake_time_nonces() {
        let chain = client(detailed_transport());
        must(chain.fetch_details(&identity(), 86_400));

        let log = chain.transport().log.borrow();
        let Some((_, params)) = log.iter().find(|(method, params)| {
            method == "eth_call"
                && params[0]["data"].as_str().unwrap_or_default().starts_with("0x184023a5")
        }) else {
            panic!("isRatioPass was not called");
        };
        let expected = abi::encode_call(
            abi::IS_RATIO_PASS,
            &abi::encode_ratio_pass_args(&[7, 45], &[4, 40], 86_400),
        );
        assert_eq!(params[0]["data"], json!(expected));
        assert_eq!(params[0]["to"], json!(DEFAULT_ACTIVITY_CHECKER));

        let balance = log.iter().find(|(method, _)| method == "eth_getBalance");
        assert_eq!(balance.map(|(_, params)| params.clone()), Some(json!([MULTISIG, "latest"])));
    }

    #[test]
    fn failed_detail_reads_are_unavailable() {
        let details = must(client(healthy_transport()).fetch_details(&identity(), 86_400));
        assert_eq!(details, StakingDetails::default());

        let reverted = detailed_transport().fail(
            abi::IS_RATIO_PASS,
            LivenessError::ContractCall("execution reverted".to_string()),
        );
        let details = must(client(reverted).fetch_details(&identity(), 86_400));
        assert_eq!(details.activity_checker_pass, None);
        assert_eq!(details.multisig_nonce_delta, Some(3));
    }

    #[test]
    fn empty_window_skips_the_activity_checker_verdict() {
        let chain = client(detailed_transport());
        let details = must(chain.fetch_details(&identity(), 0));
        assert_eq!(details.activity_checker_pass, None);
        assert_eq!(details.multisig_nonce_delta, Some(3));

        let log = chain.transport().log.borrow();
        assert!(!log.iter().any(|(_, params)| {
            params[0]["data"].as_str().unwrap_or_default().starts_with("0x184023a5")
        }));
    }

    #[test]
    fn detail_connectivity_failure_is_not_masked() {
        let transport = detailed_transport().fail(
            abi::MIN_STAKING_DEPOSIT,
            LivenessError::Connectivity("connection reset".to_string()),
        );
        let result = client(transport).fetch_details(&identity(), 86_400);
        assert!(matches!(result, Err(LivenessError::Connectivity(_))));
    }
}

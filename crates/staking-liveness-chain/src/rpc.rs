use std::cell::Cell;
use std::time::Duration;

use serde_json::{json, Value};
use staking_liveness_core::LivenessError;
use tracing::debug;

pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;

/// A JSON-RPC 2.0 endpoint.
pub trait RpcTransport {
    /// Invokes `method` and returns its `result` member.
    ///
    /// # Errors
    /// Returns [`LivenessError::Connectivity`] when the endpoint cannot be
    /// reached or answers with a malformed envelope, and
    /// [`LivenessError::ContractCall`] when it answers with an error object.
    fn call(&self, method: &str, params: Value) -> Result<Value, LivenessError>;
}

/// Blocking HTTP transport backed by `ureq`.
#[derive(Debug)]
pub struct HttpRpcTransport {
    url: String,
    agent: ureq::Agent,
    next_id: Cell<u64>,
}

impl HttpRpcTransport {
    /// Builds a transport for `url`.
    ///
    /// # Errors
    /// Returns [`LivenessError::Configuration`] when `url` is not an
    /// `http(s)` URL.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LivenessError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LivenessError::Configuration(format!(
                "rpc url MUST start with http:// or https://, got {url:?}"
            )));
        }

        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            url,
            agent,
            next_id: Cell::new(1),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RpcTransport for HttpRpcTransport {
    fn call(&self, method: &str, params: Value) -> Result<Value, LivenessError> {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        debug!(method, id, url = %self.url, "json-rpc request");

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let body = match self
            .agent
            .post(&self.url)
            .set("content-type", "application/json")
            .send_json(&request)
        {
            Ok(response) => response.into_json::<Value>().map_err(|err| {
                LivenessError::Connectivity(format!("{method}: unreadable response body: {err}"))
            })?,
            Err(ureq::Error::Status(code, response)) => {
                // Some nodes pair a JSON-RPC error object with a non-2xx status.
                if let Ok(body) = response.into_json::<Value>() {
                    if body.get("error").is_some_and(|error| !error.is_null()) {
                        return parse_envelope(method, body);
                    }
                }
                return Err(LivenessError::Connectivity(format!(
                    "{method}: http status {code} from {}",
                    self.url
                )));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(LivenessError::Connectivity(format!(
                    "{method}: http transport failure: {err}"
                )));
            }
        };

        parse_envelope(method, body)
    }
}

/// Extracts `result` from a JSON-RPC response envelope.
///
/// # Errors
/// See [`RpcTransport::call`].
pub fn parse_envelope(method: &str, mut body: Value) -> Result<Value, LivenessError> {
    if let Some(error) = body.get("error").filter(|error| !error.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(LivenessError::ContractCall(format!(
            "{method} failed with code {code}: {message}"
        )));
    }

    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(LivenessError::Connectivity(format!(
            "{method}: malformed JSON-RPC envelope (no result or error)"
        ))),
    }
}

/// Parses a hex quantity such as `"0x6985f4a0"`.
///
/// # Errors
/// Returns [`LivenessError::Connectivity`] for anything that is not a
/// `0x`-prefixed hex string fitting in 64 bits.
pub fn parse_quantity(value: &Value) -> Result<u64, LivenessError> {
    u64::try_from(parse_wide_quantity(value)?).map_err(|_| {
        LivenessError::Connectivity(format!("quantity exceeds 64 bits: {value}"))
    })
}

/// Parses a hex quantity that may exceed 64 bits, such as a wei balance.
pub fn parse_wide_quantity(value: &Value) -> Result<u128, LivenessError> {
    let raw = value.as_str().ok_or_else(|| {
        LivenessError::Connectivity(format!("expected hex quantity, got {value}"))
    })?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| LivenessError::Connectivity(format!("quantity lacks 0x prefix: {raw}")))?;
    u128::from_str_radix(digits, 16)
        .map_err(|err| LivenessError::Connectivity(format!("invalid quantity {raw}: {err}")))
}

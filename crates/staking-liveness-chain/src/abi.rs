//! Minimal Solidity ABI support for the handful of view calls the monitor
//! makes: static `uint256`/`address` arguments, `uint256[]` arguments for
//! `isRatioPass`, static return words, `uint256[]` returns, and the
//! `getServiceInfo` tuple with its dynamic `uint256[]` member.

use sha3::{Digest, Keccak256};
use staking_liveness_core::{is_evm_address, LivenessError};

pub const WORD: usize = 32;

pub const GET_STAKING_STATE: &str = "getStakingState(uint256)";
pub const GET_SERVICE_INFO: &str = "getServiceInfo(uint256)";
pub const CALCULATE_STAKING_REWARD: &str = "calculateStakingReward(uint256)";
pub const GET_NUM_ATTESTATIONS: &str = "getNumAttestations(address)";
pub const MIN_STAKING_DEPOSIT: &str = "minStakingDeposit()";
pub const GET_VOTING_STATS: &str = "getVotingStats(address)";
pub const GET_MULTISIG_NONCES: &str = "getMultisigNonces(address)";
pub const IS_RATIO_PASS: &str = "isRatioPass(uint256[],uint256[],uint256)";

pub type Word = [u8; WORD];

/// Decoded `getServiceInfo` return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub multisig: String,
    pub owner: String,
    pub nonces: Vec<u64>,
    pub ts_start: i64,
}

impl ServiceInfo {
    /// Attestation count recorded at stake time (`nonces[1]`), or 0 when the
    /// contract stored fewer than two nonces.
    #[must_use]
    pub fn attestation_baseline(&self) -> u64 {
        self.nonces.get(1).copied().unwrap_or(0)
    }
}

#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut out = [0_u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

#[must_use]
pub fn encode_uint256(value: u128) -> Word {
    let mut word = [0_u8; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_address(address: &str) -> Result<Word, LivenessError> {
    if !is_evm_address(address) {
        return Err(LivenessError::Configuration(format!(
            "not a 20-byte hex address: {address:?}"
        )));
    }
    let bytes = hex::decode(&address[2..])
        .map_err(|err| LivenessError::Configuration(format!("invalid address hex: {err}")))?;
    let mut word = [0_u8; WORD];
    word[WORD - 20..].copy_from_slice(&bytes);
    Ok(word)
}

/// Builds `0x`-prefixed calldata from a signature and pre-encoded words.
#[must_use]
pub fn encode_call(signature: &str, args: &[Word]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    format!("0x{}", hex::encode(data))
}

/// Encodes `isRatioPass(uint256[] curNonces, uint256[] lastNonces, uint256 ts)`
/// arguments: three head words (two tail offsets and `ts`), then each array
/// as a length word followed by its items.
#[must_use]
pub fn encode_ratio_pass_args(current: &[u128], last: &[u128], elapsed: u128) -> Vec<Word> {
    let head_bytes = 3 * WORD;
    let second_offset = head_bytes + WORD * (1 + current.len());

    let mut words = Vec::with_capacity(5 + current.len() + last.len());
    words.push(encode_uint256(head_bytes as u128));
    words.push(encode_uint256(second_offset as u128));
    words.push(encode_uint256(elapsed));
    for array in [current, last] {
        words.push(encode_uint256(array.len() as u128));
        words.extend(array.iter().map(|value| encode_uint256(*value)));
    }
    words
}

/// Decodes `0x`-prefixed return data into raw bytes.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, LivenessError> {
    let body = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(body)
        .map_err(|err| LivenessError::ContractCall(format!("return data is not hex: {err}")))
}

pub fn word_at(data: &[u8], index: usize) -> Result<Word, LivenessError> {
    let start = index
        .checked_mul(WORD)
        .ok_or_else(|| abi_mismatch("word index overflows"))?;
    word_at_offset(data, start)
}

fn word_at_offset(data: &[u8], start: usize) -> Result<Word, LivenessError> {
    let end = start
        .checked_add(WORD)
        .ok_or_else(|| abi_mismatch("word offset overflows"))?;
    let slice = data.get(start..end).ok_or_else(|| {
        abi_mismatch(&format!(
            "return data too short: need {end} bytes, got {}",
            data.len()
        ))
    })?;
    let mut word = [0_u8; WORD];
    word.copy_from_slice(slice);
    Ok(word)
}

pub fn word_to_u128(word: &Word) -> Result<u128, LivenessError> {
    if word[..WORD - 16].iter().any(|byte| *byte != 0) {
        return Err(abi_mismatch("uint256 value exceeds 128 bits"));
    }
    let mut low = [0_u8; 16];
    low.copy_from_slice(&word[WORD - 16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn word_to_u64(word: &Word) -> Result<u64, LivenessError> {
    u64::try_from(word_to_u128(word)?).map_err(|_| abi_mismatch("uint256 value exceeds 64 bits"))
}

pub fn word_to_usize(word: &Word) -> Result<usize, LivenessError> {
    usize::try_from(word_to_u64(word)?).map_err(|_| abi_mismatch("offset exceeds usize"))
}

pub fn word_to_address(word: &Word) -> Result<String, LivenessError> {
    if word[..WORD - 20].iter().any(|byte| *byte != 0) {
        return Err(abi_mismatch("address word has non-zero padding"));
    }
    Ok(format!("0x{}", hex::encode(&word[WORD - 20..])))
}

/// Decodes the single static word returned by a `uint256` view.
pub fn decode_uint256(data: &[u8]) -> Result<u128, LivenessError> {
    word_to_u128(&word_at(data, 0)?)
}

/// Decodes a single `bool` return word.
pub fn decode_bool(data: &[u8]) -> Result<bool, LivenessError> {
    match word_to_u128(&word_at(data, 0)?)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(abi_mismatch(&format!("bool word holds {other}"))),
    }
}

/// Decodes a lone `uint256[]` return value.
pub fn decode_uint256_array(data: &[u8]) -> Result<Vec<u128>, LivenessError> {
    let start = word_to_usize(&word_at(data, 0)?)?;
    array_words(data, start)?
        .iter()
        .map(word_to_u128)
        .collect()
}

/// Reads the length-prefixed array starting at byte `start`.
fn array_words(data: &[u8], start: usize) -> Result<Vec<Word>, LivenessError> {
    let length = word_to_usize(&word_at_offset(data, start)?)?;
    let available = data.len().saturating_sub(start.saturating_add(WORD)) / WORD;
    if length > available {
        return Err(abi_mismatch(&format!(
            "array length {length} exceeds return data ({available} words)"
        )));
    }

    (0..length)
        .map(|index| word_at_offset(data, start + WORD * (index + 1)))
        .collect()
}

/// Decodes `(address multisig, address owner, uint256[] nonces, uint256 tsStart)`.
///
/// The tuple holds a dynamic array, so the return data starts with the
/// tuple's offset, and the array offset inside the tuple is relative to the
/// tuple head.
pub fn decode_service_info(data: &[u8]) -> Result<ServiceInfo, LivenessError> {
    let base = word_to_usize(&word_at(data, 0)?)?;
    let field = |index: usize| word_at_offset(data, base.saturating_add(index * WORD));

    let multisig = word_to_address(&field(0)?)?;
    let owner = word_to_address(&field(1)?)?;
    let nonces_offset = word_to_usize(&field(2)?)?;
    let ts_start = i64::try_from(word_to_u64(&field(3)?)?)
        .map_err(|_| abi_mismatch("tsStart exceeds i64"))?;

    let array_start = base
        .checked_add(nonces_offset)
        .ok_or_else(|| abi_mismatch("nonces offset overflows"))?;
    let nonces = array_words(data, array_start)?
        .iter()
        .map(word_to_u64)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ServiceInfo {
        multisig,
        owner,
        nonces,
        ts_start,
    })
}

fn abi_mismatch(message: &str) -> LivenessError {
    LivenessError::ContractCall(format!("ABI mismatch: {message}"))
}

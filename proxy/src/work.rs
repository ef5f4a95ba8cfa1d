//! Parsing and assembly helpers for work payloads and solutions.
//!
//! Everything here handles miner- or daemon-supplied strings, so every
//! function is total: malformed input is an error, never a panic.

use primitive_types::U256;

use crate::ProxyError;

/// Maximum hex digits of a nonce (a 64-bit value).
const NONCE_HEX_DIGITS: usize = 16;

/// Byte offset in the block blob where the nonce is written.
const NONCE_OFFSET: usize = 1;

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Parse a miner nonce: `0x` optional, 1 to 16 hex digits.
pub fn parse_nonce(nonce: &str) -> Result<u64, ProxyError> {
    let digits = strip_hex_prefix(nonce);
    if digits.is_empty()
        || digits.len() > NONCE_HEX_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(ProxyError::InvalidNonce(format!(
            "expected 1..={NONCE_HEX_DIGITS} hex digits, got {:?}",
            nonce
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ProxyError::InvalidNonce(format!("{nonce:?}: {e}")))
}

/// Write `nonce` little-endian into `blob` at byte offset 1.
///
/// The blob may carry a `0x` prefix; the result never does.
pub fn splice_nonce(blob: &str, nonce: u64) -> Result<String, ProxyError> {
    let mut bytes = hex::decode(strip_hex_prefix(blob))
        .map_err(|e| ProxyError::InvalidBlob(e.to_string()))?;
    let end = NONCE_OFFSET + 8;
    if bytes.len() < end {
        return Err(ProxyError::InvalidBlob(format!(
            "blob is {} bytes, need at least {end}",
            bytes.len()
        )));
    }
    bytes[NONCE_OFFSET..end].copy_from_slice(&nonce.to_le_bytes());
    Ok(hex::encode(bytes))
}

/// Numeric difficulty of a 256-bit hex target: `2^256 / target`, saturated
/// to `u64::MAX`.
pub fn target_to_difficulty(target: &str) -> Result<u64, ProxyError> {
    let digits = strip_hex_prefix(target);
    if digits.is_empty() || digits.len() > 64 {
        return Err(ProxyError::InvalidWork(format!("bad target {target:?}")));
    }
    let target = U256::from_str_radix(digits, 16)
        .map_err(|_| ProxyError::InvalidWork(format!("bad target {target:?}")))?;
    if target.is_zero() {
        return Err(ProxyError::InvalidWork("zero target".into()));
    }
    // 2^256 does not fit; 2^256 / t == MAX / t, plus one when t divides 2^256.
    let (mut difficulty, rem) = U256::MAX.div_mod(target);
    if rem + U256::one() == target {
        difficulty = difficulty.saturating_add(U256::one());
    }
    if difficulty > U256::from(u64::MAX) {
        Ok(u64::MAX)
    } else {
        Ok(difficulty.low_u64())
    }
}

/// Parse a `0x`-optional hex height.
pub fn parse_height(height: &str) -> Result<u64, ProxyError> {
    trawl_rpc::parse_hex_u64(height)
        .ok_or_else(|| ProxyError::InvalidWork(format!("bad height {height:?}")))
}

/// Render a difficulty the way the verifier expects it.
pub fn difficulty_hex(difficulty: u64) -> String {
    format!("0x{difficulty:x}")
}

//! Request and response shapes shared by the daemon and wallet interfaces.

use serde::{Deserialize, Deserializer, Serialize};
use trawl_types::Atomic;

use crate::RpcError;

/// The chain tip as reported by the daemon.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LatestBlock {
    pub hash: String,
}

/// A work payload: `[header, seed, target, heightHex, blob]` on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkReply {
    pub header: String,
    pub seed: String,
    pub target: String,
    pub height_hex: String,
    pub blob: String,
}

impl WorkReply {
    /// Build from the positional wire form. Extra trailing entries are ignored.
    pub fn from_parts(parts: Vec<String>) -> Result<Self, String> {
        let mut it = parts.into_iter();
        match (it.next(), it.next(), it.next(), it.next(), it.next()) {
            (Some(header), Some(seed), Some(target), Some(height_hex), Some(blob)) => Ok(Self {
                header,
                seed,
                target,
                height_hex,
                blob,
            }),
            _ => Err("work reply needs 5 entries".to_string()),
        }
    }
}

/// Parameters of one solution check: `[nonce, header, auxDigest, heightHex,
/// difficultyHex]` on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolutionParams {
    pub nonce: String,
    pub header: String,
    pub aux_digest: String,
    pub height: u64,
    /// Difficulty to check against, `0x`-prefixed hex.
    pub difficulty_hex: String,
}

impl SolutionParams {
    pub fn to_wire(&self) -> [String; 5] {
        [
            self.nonce.clone(),
            self.header.clone(),
            self.aux_digest.clone(),
            format!("0x{:x}", self.height),
            self.difficulty_hex.clone(),
        ]
    }
}

/// One recipient of a wallet transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferDestination {
    pub address: String,
    #[serde(serialize_with = "serialize_atomic")]
    pub amount: Atomic,
}

impl TransferDestination {
    pub fn new(address: impl Into<String>, amount: Atomic) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

fn serialize_atomic<S: serde::Serializer>(amount: &Atomic, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(amount.raw())
}

/// A quantity sent either as a JSON number or a `0x` hex string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Quantity {
    Number(u64),
    Text(String),
}

impl Quantity {
    pub(crate) fn into_u64(self, endpoint: &str) -> Result<u64, RpcError> {
        match self {
            Quantity::Number(n) => Ok(n),
            Quantity::Text(s) => parse_hex_u64(&s).ok_or_else(|| RpcError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("not a quantity: {s}"),
            }),
        }
    }
}

/// Parse a hex quantity with or without the `0x` prefix.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Deserialize a wallet amount sent as a JSON number.
pub(crate) fn deserialize_atomic<'de, D: Deserializer<'de>>(d: D) -> Result<Atomic, D::Error> {
    u128::deserialize(d).map(Atomic::new)
}

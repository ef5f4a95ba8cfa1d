//! Share and block-candidate storage with duplicate detection.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::StoreError;
use trawl_types::{PayeeAddress, Timestamp};

/// Fingerprints recorded more than this many heights below the newest one are
/// pruned. Job backlogs must not reach further back than this.
pub const FINGERPRINT_WINDOW: u64 = 8;

type Blake2b256 = Blake2b<U32>;

/// Duplicate-detection key of a solution: Blake2b-256 over
/// `nonce:header:aux_digest` (lower-cased, without `0x`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SolutionFingerprint([u8; 32]);

impl SolutionFingerprint {
    pub fn of(nonce: &str, header: &str, aux_digest: &str) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(normalize(nonce).as_bytes());
        hasher.update(b":");
        hasher.update(normalize(header).as_bytes());
        hasher.update(b":");
        hasher.update(normalize(aux_digest).as_bytes());
        let result = hasher.finalize();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        Self(output)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn normalize(hex_str: &str) -> String {
    hex_str
        .strip_prefix("0x")
        .unwrap_or(hex_str)
        .to_ascii_lowercase()
}

impl fmt::Debug for SolutionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SolutionFingerprint({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for SolutionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A valid share credited to the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub payee: PayeeAddress,
    pub worker: String,
    pub fingerprint: SolutionFingerprint,
    pub share_difficulty: u64,
    pub height: u64,
    pub timestamp: Timestamp,
    /// How long this share counts toward the payee's hashrate estimate.
    pub hashrate_window_secs: u64,
}

impl ShareRecord {
    /// Unix second at which this share stops counting toward hashrate.
    pub fn hashrate_expiry(&self) -> u64 {
        self.timestamp.as_secs().saturating_add(self.hashrate_window_secs)
    }
}

/// A solution the daemon accepted as a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub share: ShareRecord,
    pub block_difficulty: u64,
    pub nonce: String,
    pub header: String,
    /// Total share difficulty of the round this block closes.
    #[serde(default)]
    pub round_shares: u64,
}

/// Share and block writes. Both return `Ok(true)` when the fingerprint was
/// already recorded, in which case nothing is written.
pub trait ShareStore {
    fn write_share(&self, share: &ShareRecord) -> Result<bool, StoreError>;

    /// Record a block candidate. The payee's own share is counted into the
    /// round before the round is closed into the candidate.
    fn write_block(&self, block: &BlockRecord) -> Result<bool, StoreError>;

    /// Share difficulty accumulated by a payee in the current round.
    fn round_shares(&self, payee: &PayeeAddress) -> Result<u64, StoreError>;

    /// Recorded block candidates, lowest height first.
    fn block_candidates(&self) -> Result<Vec<BlockRecord>, StoreError>;

    /// Share difficulty per payee from shares whose hashrate window is still
    /// open at `now`.
    fn recent_shares(&self, now: Timestamp) -> Result<BTreeMap<PayeeAddress, u64>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_prefix_and_case() {
        let a = SolutionFingerprint::of("0xABCD", "0x01", "0xff");
        let b = SolutionFingerprint::of("abcd", "01", "FF");
        assert_eq!(a, b);
    }

    #[test]
    fn hashrate_expiry_adds_window_to_timestamp() {
        let share = ShareRecord {
            payee: PayeeAddress::new("Zx1").unwrap(),
            worker: "rig".into(),
            fingerprint: SolutionFingerprint::of("01", "02", "03"),
            share_difficulty: 5,
            height: 1,
            timestamp: Timestamp::new(1_000),
            hashrate_window_secs: 600,
        };
        assert_eq!(share.hashrate_expiry(), 1_600);
    }

    #[test]
    fn fingerprint_separates_fields() {
        let a = SolutionFingerprint::of("ab", "cd", "ef");
        let b = SolutionFingerprint::of("abc", "d", "ef");
        assert_ne!(a, b);
    }
}

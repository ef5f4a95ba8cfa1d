//! LMDB environment setup.

use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::integrity::{check_data_dir, check_integrity};
use crate::migration::Migrator;
use crate::LmdbError;

/// Default memory map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

const MAX_DBS: u32 = 16;

/// The pool ledger: one LMDB environment and all its database handles.
///
/// Databases:
/// - `accounts`: payee → `PayeeAccount`
/// - `pending`: payee → `PendingPayment`
/// - `payments`: `payee ++ 0x00 ++ seq_be(8)` → `PaymentRecord`
/// - `fingerprints`: fingerprint(32) → height_be(8)
/// - `fingerprint_heights`: `height_be(8) ++ fingerprint(32)` → empty
/// - `rounds`: payee → round share difficulty, u64 big-endian
/// - `blocks`: `height_be(8) ++ fingerprint(32)` → `BlockRecord`
/// - `hashrate`: `expiry_be(8) ++ fingerprint(32)` → payee and share difficulty
/// - `meta`: payout lock, sequence counters, schema version
pub struct LmdbLedger {
    pub(crate) env: Env,
    path: PathBuf,
    pub(crate) accounts_db: Database<Bytes, Bytes>,
    pub(crate) pending_db: Database<Bytes, Bytes>,
    pub(crate) payments_db: Database<Bytes, Bytes>,
    pub(crate) fingerprints_db: Database<Bytes, Bytes>,
    pub(crate) fingerprint_heights_db: Database<Bytes, Bytes>,
    pub(crate) rounds_db: Database<Bytes, Bytes>,
    pub(crate) blocks_db: Database<Bytes, Bytes>,
    pub(crate) hashrate_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbLedger {
    /// Open or create the ledger at `path` with the default map size.
    pub fn open(path: &Path) -> Result<Self, LmdbError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        check_data_dir(path).map_err(LmdbError::Heed)?;
        std::fs::create_dir_all(path)
            .map_err(|e| LmdbError::Heed(format!("create {}: {e}", path.display())))?;

        // SAFETY: the environment is opened once per process for this path.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let accounts_db = env.create_database(&mut wtxn, Some("accounts"))?;
        let pending_db = env.create_database(&mut wtxn, Some("pending"))?;
        let payments_db = env.create_database(&mut wtxn, Some("payments"))?;
        let fingerprints_db = env.create_database(&mut wtxn, Some("fingerprints"))?;
        let fingerprint_heights_db =
            env.create_database(&mut wtxn, Some("fingerprint_heights"))?;
        let rounds_db = env.create_database(&mut wtxn, Some("rounds"))?;
        let blocks_db = env.create_database(&mut wtxn, Some("blocks"))?;
        let hashrate_db = env.create_database(&mut wtxn, Some("hashrate"))?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        let ledger = Self {
            env,
            path: path.to_path_buf(),
            accounts_db,
            pending_db,
            payments_db,
            fingerprints_db,
            fingerprint_heights_db,
            rounds_db,
            blocks_db,
            hashrate_db,
            meta_db,
        };

        Migrator::run(&ledger)?;
        let report = check_integrity(&ledger.env)?;
        if !report.is_healthy() {
            return Err(LmdbError::Heed(report.errors.join("; ")));
        }
        tracing::info!(
            path = %path.display(),
            databases = report.databases_checked,
            entries = report.total_entries,
            "ledger opened"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Increment a byte prefix to produce the exclusive upper bound of a prefix
/// range scan. Returns `false` if the prefix is all `0xff`.
pub(crate) fn increment_prefix(prefix: &mut Vec<u8>) -> bool {
    while let Some(last) = prefix.last_mut() {
        if *last < 0xff {
            *last += 1;
            return true;
        }
        prefix.pop();
    }
    false
}

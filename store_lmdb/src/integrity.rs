//! LMDB database integrity checks.
//!
//! Run on open to detect corruption early, before the pool starts crediting
//! shares.

use std::path::Path;

use heed::Env;

use crate::LmdbError;

/// Summary of an integrity check run.
pub struct IntegrityReport {
    pub databases_checked: u32,
    pub total_entries: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    /// Returns `true` if no errors were detected.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Database names that must exist in a trawl ledger.
const EXPECTED_DATABASES: &[&str] = &[
    "accounts",
    "pending",
    "payments",
    "fingerprints",
    "fingerprint_heights",
    "rounds",
    "blocks",
    "hashrate",
    "meta",
];

/// Open each expected database and count its entries.
///
/// Read failures and missing databases are recorded in the report rather
/// than causing a hard error.
pub fn check_integrity(env: &Env) -> Result<IntegrityReport, LmdbError> {
    let mut report = IntegrityReport {
        databases_checked: 0,
        total_entries: 0,
        errors: Vec::new(),
    };

    let rtxn = env.read_txn()?;

    for &db_name in EXPECTED_DATABASES {
        match env.open_database::<heed::types::Bytes, heed::types::Bytes>(&rtxn, Some(db_name)) {
            Ok(Some(db)) => {
                report.databases_checked += 1;
                match db.len(&rtxn) {
                    Ok(count) => report.total_entries += count,
                    Err(e) => report
                        .errors
                        .push(format!("failed to read database '{db_name}': {e}")),
                }
            }
            Ok(None) => report
                .errors
                .push(format!("database '{db_name}' is missing")),
            Err(e) => report
                .errors
                .push(format!("failed to open database '{db_name}': {e}")),
        }
    }

    Ok(report)
}

/// Check that a ledger directory looks valid before opening.
///
/// A missing or empty directory is a fresh start. A directory with other
/// files but no `data.mdb` suggests a wrong path or a damaged ledger.
pub fn check_data_dir(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    let has_entries = std::fs::read_dir(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?
        .next()
        .is_some();
    if has_entries && !path.join("data.mdb").exists() {
        return Err(format!(
            "ledger directory {} is not empty but data.mdb is missing",
            path.display()
        ));
    }
    Ok(())
}

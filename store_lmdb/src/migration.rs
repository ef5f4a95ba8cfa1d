//! Ledger schema migration engine.
//!
//! Tracks a monotonically increasing schema version in the meta database and
//! runs sequential migration functions to bring an older ledger up to date.

use crate::{LmdbError, LmdbLedger};

/// The schema version that the current code expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Runs ledger migrations to bring the schema up to date.
pub struct Migrator;

impl Migrator {
    /// Check the stored schema version and run any needed migrations.
    ///
    /// - Version 0 means a fresh ledger (no version stored yet).
    /// - A stored version higher than [`CURRENT_SCHEMA_VERSION`] was written by
    ///   a newer pool and is refused.
    pub fn run(ledger: &LmdbLedger) -> Result<(), LmdbError> {
        let current = ledger.schema_version()?;

        if current == CURRENT_SCHEMA_VERSION {
            tracing::debug!(version = current, "ledger schema is up to date");
            return Ok(());
        }

        if current > CURRENT_SCHEMA_VERSION {
            return Err(LmdbError::Heed(format!(
                "ledger schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }

        for version in current..CURRENT_SCHEMA_VERSION {
            tracing::info!(from = version, to = version + 1, "running migration");
            run_migration(version, version + 1)?;
        }

        ledger.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        tracing::info!(version = CURRENT_SCHEMA_VERSION, "migration complete");
        Ok(())
    }
}

fn run_migration(from: u32, to: u32) -> Result<(), LmdbError> {
    match (from, to) {
        // Initial schema, nothing to migrate from a blank ledger.
        (0, 1) => Ok(()),
        // The hashrate database is created on open; older shares carry no samples.
        (1, 2) => Ok(()),
        _ => Err(LmdbError::Heed(format!("unknown migration: {from} -> {to}"))),
    }
}

//! LMDB ledger backend for the trawl mining pool.
//!
//! Implements all ledger traits from `trawl-store` using the `heed` LMDB
//! bindings. Every trait call runs in exactly one LMDB write (or read)
//! transaction, so each operation either fully commits or leaves no trace.

pub mod account;
pub mod block;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod meta;
pub mod migration;
pub mod pending;

pub use environment::LmdbLedger;
pub use error::LmdbError;

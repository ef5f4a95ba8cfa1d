//! Nullable infrastructure for deterministic testing.
//!
//! All external collaborators of the pool (ledger, daemon, wallet) are
//! abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Keep all state in memory and never touch the filesystem or network
//! - Can be scripted programmatically (balances, verification outcomes)
//! - Can inject failures into any single operation, immediately or after a
//!   number of successful calls
//! - Count calls so tests can assert that nothing happened
//!
//! Usage: swap real implementations for nullables in tests.

pub mod daemon;
pub mod store;
pub mod wallet;

pub use daemon::{NullDaemon, SubmitBehavior};
pub use store::{LedgerOp, NullLedger};
pub use wallet::{NullWallet, RecordedTransfer};

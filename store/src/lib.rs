//! Abstract ledger storage traits for the trawl mining pool.
//!
//! Every ledger backend (LMDB, in-memory for testing) implements these traits.
//! The rest of the codebase depends only on the traits. Each trait method is
//! one atomic operation: it either fully applies or fails with no effect.

pub mod account;
pub mod block;
pub mod error;
pub mod pending;

pub use account::{PayeeAccount, PayeeStore};
pub use block::{BlockRecord, ShareRecord, ShareStore, SolutionFingerprint, FINGERPRINT_WINDOW};
pub use error::StoreError;
pub use pending::{PaymentRecord, PaymentStore, PendingPayment};

/// Everything the pool needs from its ledger, as one object-safe bound.
pub trait Ledger: PayeeStore + PaymentStore + ShareStore + Send + Sync {}

impl<T> Ledger for T where T: PayeeStore + PaymentStore + ShareStore + Send + Sync {}

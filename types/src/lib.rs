//! Fundamental types for the trawl mining pool.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! payee addresses and their classification, accounting and wallet amounts, and
//! timestamps.

pub mod address;
pub mod amount;
pub mod error;
pub mod time;

pub use address::{AddressKind, PayeeAddress};
pub use amount::{Atomic, Shannon, ATOMIC_PER_SHANNON};
pub use error::TypesError;
pub use time::Timestamp;

//! Payout settlement engine.
//!
//! [`PayoutProcessor`] periodically drains payee balances that crossed their
//! payout threshold into wallet transfers. Every step that moves money is
//! bracketed by ledger records so a crash mid-settlement leaves a trail the
//! resolution pass can repair, and any financial error latches a halt that
//! only an operator restart clears.

pub mod config;
pub mod error;
pub mod fees;
pub mod processor;

pub use config::PayoutsConfig;
pub use error::PayoutError;
pub use fees::{fee_shares, split_batch_fee};
pub use processor::{
    format_pending_payments, PayoutProcessor, ResolutionReport, RunSummary, StartupMode,
};

use thiserror::Error;

use trawl_rpc::RpcError;
use trawl_store::StoreError;
use trawl_types::{Atomic, TypesError};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("ledger error: {0}")]
    Store(#[from] StoreError),

    #[error("amount error: {0}")]
    Amount(#[from] TypesError),

    #[error("not enough balance for payment, need {needed}, pool has {available}")]
    InsufficientFunds { needed: Atomic, available: Atomic },

    #[error("{0} pending payments from a previous run must be resolved first")]
    PendingPaymentsExist(usize),

    #[error("payouts are locked")]
    PayoutsLocked,

    #[error("wallet cannot sign for the pool address: {0}")]
    WalletLocked(#[source] RpcError),

    #[error("fee {fee} exceeds transfer amount {amount}")]
    FeeExceedsAmount { amount: Atomic, fee: Atomic },

    #[error("invalid configuration: {0}")]
    Config(String),
}

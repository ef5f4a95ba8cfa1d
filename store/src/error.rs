use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("payouts are locked by a pending payment")]
    PayoutsLocked,

    #[error("insufficient balance for {payee}: need {needed}, have {available}")]
    InsufficientBalance {
        payee: String,
        needed: u64,
        available: u64,
    },

    #[error("record in unexpected state: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}

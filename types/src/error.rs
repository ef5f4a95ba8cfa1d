//! Error type for constructing and converting fundamental values.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid payee address: {0}")]
    InvalidAddress(String),

    #[error("amount overflow: {0}")]
    AmountOverflow(String),

    #[error("amount underflow: {minuend} - {subtrahend}")]
    AmountUnderflow { minuend: u128, subtrahend: u128 },
}

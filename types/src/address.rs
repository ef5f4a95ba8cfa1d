//! Payee address type and destination classification.
//!
//! Payees are identified by the chain address they mine to. Two address forms
//! matter to settlement: standard addresses can share one fee-splitting batch
//! transaction, integrated addresses embed a payment id and must each be paid
//! in a transaction of their own.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Prefixes of integrated addresses (mainnet and auditable forms).
const INTEGRATED_PREFIXES: [&str; 2] = ["iZ", "aiZX"];

/// How a destination address must be paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Can be multiplexed into the shared batch transaction.
    Standard,
    /// Carries an embedded payment id; settled in an isolated transaction.
    Integrated,
}

impl AddressKind {
    /// Classify a raw address string.
    pub fn of(address: &str) -> Self {
        if INTEGRATED_PREFIXES.iter().any(|p| address.starts_with(p)) {
            AddressKind::Integrated
        } else {
            AddressKind::Standard
        }
    }
}

/// A payee (miner) address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayeeAddress(String);

impl PayeeAddress {
    /// Create a payee address, rejecting empty or non-alphanumeric strings.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypesError> {
        let s = raw.into();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypesError::InvalidAddress(s));
        }
        Ok(Self(s))
    }

    /// Return the raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> AddressKind {
        AddressKind::of(&self.0)
    }
}

impl fmt::Display for PayeeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PayeeAddress {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for PayeeAddress {
    type Error = TypesError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrated_prefixes_classify_as_integrated() {
        assert_eq!(AddressKind::of("iZ2EMyPSQ5Ab"), AddressKind::Integrated);
        assert_eq!(AddressKind::of("aiZXDondHWu9"), AddressKind::Integrated);
    }

    #[test]
    fn other_addresses_are_standard() {
        assert_eq!(AddressKind::of("ZxDNaMeZjwCj"), AddressKind::Standard);
        assert_eq!(AddressKind::of("aZxb9Et6FhP9"), AddressKind::Standard);
        // "aiZ" without the trailing X is not an integrated prefix
        assert_eq!(AddressKind::of("aiZa"), AddressKind::Standard);
        assert_eq!(AddressKind::of(""), AddressKind::Standard);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(PayeeAddress::new("").is_err());
        assert!(PayeeAddress::new("Zx abc").is_err());
        assert!(PayeeAddress::new("Zx:abc").is_err());
        assert!(PayeeAddress::new("ZxAbc123").is_ok());
    }

    #[test]
    fn payee_kind_matches_classifier() {
        let payee = PayeeAddress::new("iZ42").unwrap();
        assert_eq!(payee.kind(), AddressKind::Integrated);
    }
}

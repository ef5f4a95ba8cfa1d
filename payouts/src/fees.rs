//! Splitting one transaction fee across the members of a batch.
//!
//! The fee is divided evenly; the remainder `fee % n` is charged one unit at
//! a time to the earliest members. Earlier members therefore pay at most one
//! unit more than later ones.

use trawl_types::Atomic;

use crate::PayoutError;

/// Fee charged to each of `count` batch members, in member order.
pub fn fee_shares(count: usize, fee: Atomic) -> Vec<Atomic> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as u128;
    let per_member = fee.raw() / n;
    let remainder = (fee.raw() % n) as usize;
    (0..count)
        .map(|i| Atomic::new(per_member + u128::from(i < remainder)))
        .collect()
}

/// Post-fee amounts for a batch with pre-fee `amounts`.
///
/// Fails if any member's amount does not exceed its fee share.
pub fn split_batch_fee(amounts: &[Atomic], fee: Atomic) -> Result<Vec<Atomic>, PayoutError> {
    amounts
        .iter()
        .zip(fee_shares(amounts.len(), fee))
        .map(|(&amount, share)| match amount.checked_sub(share) {
            Some(net) if !net.is_zero() => Ok(net),
            _ => Err(PayoutError::FeeExceedsAmount { amount, fee: share }),
        })
        .collect()
}

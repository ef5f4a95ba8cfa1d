//! Small values kept in the `meta` database: the payout lock, sequence
//! counters and the schema version.

use heed::{RoTxn, RwTxn};

use crate::{LmdbError, LmdbLedger};

pub(crate) const PAYOUTS_LOCK_KEY: &[u8] = b"payouts_lock";
pub(crate) const PAYMENT_SEQ_KEY: &[u8] = b"payment_seq";
pub(crate) const NEWEST_HEIGHT_KEY: &[u8] = b"newest_share_height";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

impl LmdbLedger {
    pub(crate) fn read_u64(&self, txn: &RoTxn, key: &[u8]) -> Result<Option<u64>, LmdbError> {
        match self.meta_db.get(txn, key)? {
            Some(bytes) => decode_u64(bytes).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn write_u64(
        &self,
        wtxn: &mut RwTxn,
        key: &[u8],
        value: u64,
    ) -> Result<(), LmdbError> {
        self.meta_db.put(wtxn, key, &value.to_be_bytes())?;
        Ok(())
    }

    /// Return the next value of a monotonically increasing counter.
    pub(crate) fn next_seq(&self, wtxn: &mut RwTxn, key: &[u8]) -> Result<u64, LmdbError> {
        let next = self.read_u64(wtxn, key)?.unwrap_or(0) + 1;
        self.write_u64(wtxn, key, next)?;
        Ok(next)
    }

    pub(crate) fn lock_held(&self, txn: &RoTxn) -> Result<bool, LmdbError> {
        Ok(self.meta_db.get(txn, PAYOUTS_LOCK_KEY)?.is_some())
    }

    pub(crate) fn set_lock(&self, wtxn: &mut RwTxn, held: bool) -> Result<(), LmdbError> {
        if held {
            self.meta_db.put(wtxn, PAYOUTS_LOCK_KEY, &[1u8][..])?;
        } else {
            self.meta_db.delete(wtxn, PAYOUTS_LOCK_KEY)?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32, LmdbError> {
        let rtxn = self.env.read_txn()?;
        match self.meta_db.get(&rtxn, SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                    LmdbError::Serialization(
                        "schema_version has unexpected byte length".to_string(),
                    )
                })?;
                Ok(u32::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    pub(crate) fn set_schema_version(&self, version: u32) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        self.meta_db
            .put(&mut wtxn, SCHEMA_VERSION_KEY, &version.to_le_bytes())?;
        wtxn.commit()?;
        Ok(())
    }
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, LmdbError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbError::Serialization(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

//! LMDB implementation of ShareStore.
//!
//! Duplicate detection uses two databases: `fingerprints` answers "seen
//! before?" in one lookup, and `fingerprint_heights` (`height_be ++
//! fingerprint`) lets pruning delete everything below a height with a single
//! range scan.
//!
//! Hashrate samples are keyed by expiry (`expiry_be ++ fingerprint`), so
//! expired samples are a prefix of the database.

use std::collections::BTreeMap;
use std::ops::Bound;

use heed::RwTxn;
use serde::{Deserialize, Serialize};

use trawl_store::{BlockRecord, ShareRecord, ShareStore, SolutionFingerprint, StoreError};
use trawl_store::FINGERPRINT_WINDOW;
use trawl_types::{PayeeAddress, Timestamp};

use crate::meta::{decode_u64, NEWEST_HEIGHT_KEY};
use crate::{LmdbError, LmdbLedger};

fn height_key(height: u64, fingerprint: &SolutionFingerprint) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(fingerprint.as_bytes());
    key
}

#[derive(Serialize, Deserialize)]
struct HashrateSample {
    payee: PayeeAddress,
    share_difficulty: u64,
}

impl LmdbLedger {
    /// Record a fingerprint unless already present. Returns `true` for a
    /// duplicate. Advances the newest height and prunes below the window.
    fn insert_fingerprint(
        &self,
        wtxn: &mut RwTxn,
        fingerprint: &SolutionFingerprint,
        height: u64,
    ) -> Result<bool, LmdbError> {
        if self
            .fingerprints_db
            .get(wtxn, fingerprint.as_bytes().as_slice())?
            .is_some()
        {
            return Ok(true);
        }

        let newest = self.read_u64(wtxn, NEWEST_HEIGHT_KEY)?.unwrap_or(0);
        if height > newest {
            self.write_u64(wtxn, NEWEST_HEIGHT_KEY, height)?;
            self.prune_fingerprints(wtxn, height.saturating_sub(FINGERPRINT_WINDOW))?;
        }

        self.fingerprints_db
            .put(wtxn, fingerprint.as_bytes().as_slice(), &height.to_be_bytes())?;
        self.fingerprint_heights_db
            .put(wtxn, &height_key(height, fingerprint), &[])?;
        Ok(false)
    }

    /// Delete every fingerprint recorded below `floor`.
    fn prune_fingerprints(&self, wtxn: &mut RwTxn, floor: u64) -> Result<(), LmdbError> {
        let upper = floor.to_be_bytes();
        let bounds = (Bound::Unbounded, Bound::Excluded(upper.as_slice()));
        let mut stale = Vec::new();
        for entry in self.fingerprint_heights_db.range(wtxn, &bounds)? {
            let (key, _) = entry?;
            stale.push(key.to_vec());
        }
        for key in &stale {
            self.fingerprint_heights_db.delete(wtxn, key)?;
            self.fingerprints_db.delete(wtxn, &key[8..])?;
        }
        if !stale.is_empty() {
            tracing::debug!(pruned = stale.len(), floor, "pruned solution fingerprints");
        }
        Ok(())
    }

    /// Drop samples expired at the share's timestamp, then store the share's
    /// own sample.
    fn add_hashrate_sample(&self, wtxn: &mut RwTxn, share: &ShareRecord) -> Result<(), LmdbError> {
        let upper = share.timestamp.as_secs().saturating_add(1).to_be_bytes();
        let bounds = (Bound::Unbounded, Bound::Excluded(upper.as_slice()));
        let mut expired = Vec::new();
        for entry in self.hashrate_db.range(wtxn, &bounds)? {
            let (key, _) = entry?;
            expired.push(key.to_vec());
        }
        for key in &expired {
            self.hashrate_db.delete(wtxn, key)?;
        }

        let sample = HashrateSample {
            payee: share.payee.clone(),
            share_difficulty: share.share_difficulty,
        };
        let bytes = bincode::serialize(&sample)?;
        self.hashrate_db.put(
            wtxn,
            &height_key(share.hashrate_expiry(), &share.fingerprint),
            &bytes,
        )?;
        Ok(())
    }

    fn add_round_shares(
        &self,
        wtxn: &mut RwTxn,
        payee: &PayeeAddress,
        difficulty: u64,
    ) -> Result<(), LmdbError> {
        let key = payee.as_str().as_bytes();
        let current = match self.rounds_db.get(wtxn, key)? {
            Some(bytes) => decode_u64(bytes)?,
            None => 0,
        };
        self.rounds_db
            .put(wtxn, key, &current.saturating_add(difficulty).to_be_bytes())?;
        Ok(())
    }

    /// Sum the current round and reset it.
    fn close_round(&self, wtxn: &mut RwTxn) -> Result<u64, LmdbError> {
        let mut total = 0u64;
        for entry in self.rounds_db.iter(wtxn)? {
            let (_, val) = entry?;
            total = total.saturating_add(decode_u64(val)?);
        }
        self.rounds_db.clear(wtxn)?;
        Ok(total)
    }
}

impl ShareStore for LmdbLedger {
    fn write_share(&self, share: &ShareRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.insert_fingerprint(&mut wtxn, &share.fingerprint, share.height)? {
            return Ok(true);
        }
        self.add_round_shares(&mut wtxn, &share.payee, share.share_difficulty)?;
        self.add_hashrate_sample(&mut wtxn, share)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(false)
    }

    fn write_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
        let share = &block.share;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.insert_fingerprint(&mut wtxn, &share.fingerprint, share.height)? {
            return Ok(true);
        }
        self.add_round_shares(&mut wtxn, &share.payee, share.share_difficulty)?;
        self.add_hashrate_sample(&mut wtxn, share)?;

        let mut record = block.clone();
        record.round_shares = self.close_round(&mut wtxn)?;
        let bytes = bincode::serialize(&record).map_err(LmdbError::from)?;
        self.blocks_db
            .put(&mut wtxn, &height_key(share.height, &share.fingerprint), &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(false)
    }

    fn round_shares(&self, payee: &PayeeAddress) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .rounds_db
            .get(&rtxn, payee.as_str().as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Ok(decode_u64(bytes)?),
            None => Ok(0),
        }
    }

    fn block_candidates(&self) -> Result<Vec<BlockRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in self.blocks_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_key, val) = entry.map_err(LmdbError::from)?;
            let record: BlockRecord = bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push(record);
        }
        Ok(results)
    }

    fn recent_shares(&self, now: Timestamp) -> Result<BTreeMap<PayeeAddress, u64>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let lower = now.as_secs().to_be_bytes();
        let bounds = (Bound::Excluded(lower.as_slice()), Bound::Unbounded);
        let mut totals = BTreeMap::new();
        for entry in self.hashrate_db.range(&rtxn, &bounds).map_err(LmdbError::from)? {
            let (key, val) = entry.map_err(LmdbError::from)?;
            // keys sharing the `now` prefix sort after it but are already expired
            if key[..8] == lower {
                continue;
            }
            let sample: HashrateSample = bincode::deserialize(val).map_err(LmdbError::from)?;
            let total: &mut u64 = totals.entry(sample.payee).or_default();
            *total = total.saturating_add(sample.share_difficulty);
        }
        Ok(totals)
    }
}

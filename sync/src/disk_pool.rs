//! The disk pool: accounting for data roots of not-yet-confirmed
//! transactions whose chunks are staged on disk.
//!
//! Each pending root tracks the bytes staged for it, the timestamp under
//! which its chunks are keyed in `disk_pool_chunks_index`, and the set of
//! transactions announcing it. A root seen in a confirmed block drops its
//! tx set (`None`) and never expires.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use loom_types::{DataRootKey, Timestamp, TxId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRootEntry {
    /// Bytes staged on disk for this root.
    pub size: u64,
    /// Timestamp under which the root's chunks are keyed.
    pub timestamp: Timestamp,
    /// Announcing transactions; `None` once the root has been confirmed.
    pub tx_ids: Option<HashSet<TxId>>,
}

/// In-memory view of the disk pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPool {
    roots: HashMap<DataRootKey, DataRootEntry>,
    /// Total staged bytes across all roots.
    pub size: u64,
}

impl DiskPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &DataRootKey) -> bool {
        self.roots.contains_key(key)
    }

    pub fn get(&self, key: &DataRootKey) -> Option<&DataRootEntry> {
        self.roots.get(key)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Announce `key` for transaction `tx_id`. A new root starts empty at
    /// `now`; a known root gains the tx id (confirmed roots stay confirmed).
    pub fn add_root(&mut self, key: DataRootKey, tx_id: TxId, now: Timestamp) {
        let entry = self.roots.entry(key).or_insert_with(|| DataRootEntry {
            size: 0,
            timestamp: now,
            tx_ids: Some(HashSet::new()),
        });
        if let Some(tx_ids) = entry.tx_ids.as_mut() {
            tx_ids.insert(tx_id);
        }
    }

    /// Drop `tx_id` from `key`; the root itself is removed once no
    /// transaction announces it anymore. Confirmed roots are never dropped.
    pub fn maybe_drop_root(&mut self, key: &DataRootKey, tx_id: &TxId) {
        let remove = match self.roots.get_mut(key) {
            Some(entry) => match entry.tx_ids.as_mut() {
                Some(tx_ids) => {
                    tx_ids.remove(tx_id);
                    tx_ids.is_empty()
                }
                None => false,
            },
            None => return,
        };
        if remove {
            if let Some(entry) = self.roots.remove(key) {
                self.size -= entry.size;
            }
        }
    }

    /// Mark `key` as confirmed: it will no longer expire.
    pub fn mark_confirmed(&mut self, key: &DataRootKey) {
        if let Some(entry) = self.roots.get_mut(key) {
            entry.tx_ids = None;
        }
    }

    /// Remove `key` entirely (its chunks were promoted into the main
    /// indices and the staging rows deleted).
    pub fn remove(&mut self, key: &DataRootKey) {
        if let Some(entry) = self.roots.remove(key) {
            self.size -= entry.size;
        }
    }

    /// Book `bytes` of freshly staged chunk data against `key`.
    pub fn account_chunk(&mut self, key: &DataRootKey, bytes: u64) {
        if let Some(entry) = self.roots.get_mut(key) {
            entry.size += bytes;
            self.size += bytes;
        }
    }

    /// Drop unconfirmed roots whose first-seen timestamp has expired and
    /// recompute the pool size from the survivors. Returns the expired keys.
    pub fn expire(&mut self, expiration_micros: u64, now: Timestamp) -> Vec<DataRootKey> {
        let expired: Vec<DataRootKey> = self
            .roots
            .iter()
            .filter(|(_, entry)| {
                entry.tx_ids.is_some() && entry.timestamp.has_expired(expiration_micros, now)
            })
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.roots.remove(key);
        }
        self.size = self.roots.values().map(|e| e.size).sum();
        expired
    }

    /// Give `key` a fresh timestamp, preserving its tx set. A root not in
    /// the pool is inserted as a new pending entry — this is the reorg
    /// path re-opening roots whose blocks were orphaned.
    pub fn reset_timestamp(&mut self, key: DataRootKey, now: Timestamp) {
        self.roots
            .entry(key)
            .and_modify(|entry| {
                entry.timestamp = now;
                if entry.tx_ids.is_none() {
                    entry.tx_ids = Some(HashSet::new());
                }
            })
            .or_insert_with(|| DataRootEntry {
                size: 0,
                timestamp: now,
                tx_ids: Some(HashSet::new()),
            });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DataRootKey, &DataRootEntry)> {
        self.roots.iter()
    }
}

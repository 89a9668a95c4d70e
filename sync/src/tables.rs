//! Key and value codecs for the nine chunk-store tables.
//!
//! Integer keys are big-endian so byte order matches numeric order. Values
//! are bincode-encoded structs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use loom_store::StoreError;
use loom_types::{DataPathHash, DataRoot, DataRootKey, Timestamp, TxRoot};

/// Key of an offset-keyed table.
pub fn offset_key(offset: u64) -> [u8; 8] {
    offset.to_be_bytes()
}

pub fn parse_offset_key(key: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(key.try_into().ok()?))
}

/// Key of `disk_pool_chunks_index`: a 32-byte big-endian timestamp followed
/// by the data-path hash. The wide timestamp keeps the key space open for
/// finer clocks; today only the low 8 bytes are populated.
pub fn disk_pool_key(timestamp: Timestamp, data_path_hash: &DataPathHash) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[24..32].copy_from_slice(&timestamp.as_micros().to_be_bytes());
    key[32..].copy_from_slice(data_path_hash.as_bytes());
    key
}

/// Prefix of all `disk_pool_chunks_index` keys with the given timestamp.
pub fn disk_pool_ts_prefix(timestamp: Timestamp) -> [u8; 32] {
    let mut prefix = [0u8; 32];
    prefix[24..].copy_from_slice(&timestamp.as_micros().to_be_bytes());
    prefix
}

pub fn parse_disk_pool_key(key: &[u8]) -> Option<(Timestamp, DataPathHash)> {
    if key.len() != 64 {
        return None;
    }
    let micros = u64::from_be_bytes(key[24..32].try_into().ok()?);
    let hash = DataPathHash::from_slice(&key[32..])?;
    Some((Timestamp::new(micros), hash))
}

/// `chunks_index` value: everything needed to rebuild a chunk's proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub data_path_hash: DataPathHash,
    pub tx_root: TxRoot,
    pub data_root: DataRoot,
    pub tx_path: Vec<u8>,
    pub chunk_offset_in_tx: u64,
    pub chunk_size: u64,
}

/// `chunk_data_index` value. Rows written before the v2 migration carry an
/// empty `chunk` and keep the bytes in the legacy file-per-hash store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    pub chunk: Vec<u8>,
    pub data_path: Vec<u8>,
}

/// `data_root_index` value: every confirmed placement of a data root.
/// tx root → absolute tx start offset → tx path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRootPlacements {
    pub tx_roots: BTreeMap<TxRoot, BTreeMap<u64, Vec<u8>>>,
}

impl DataRootPlacements {
    pub fn is_empty(&self) -> bool {
        self.tx_roots.is_empty()
    }

    /// Insert a placement, overwriting any previous path for the same
    /// (tx_root, offset) pair.
    pub fn insert(&mut self, tx_root: TxRoot, tx_start: u64, tx_path: Vec<u8>) {
        self.tx_roots.entry(tx_root).or_default().insert(tx_start, tx_path);
    }

    /// All `(tx_root, abs_tx_start, tx_path)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (TxRoot, u64, &Vec<u8>)> + '_ {
        self.tx_roots.iter().flat_map(|(root, offsets)| {
            offsets.iter().map(move |(start, path)| (*root, *start, path))
        })
    }

    /// Remove placements starting at or above `offset`. Returns whether the
    /// record became empty.
    pub fn remove_at_or_above(&mut self, offset: u64) -> bool {
        self.tx_roots.retain(|_, offsets| {
            offsets.retain(|start, _| *start < offset);
            !offsets.is_empty()
        });
        self.is_empty()
    }
}

/// `data_root_offset_index` value: one row per block with data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOffsetRecord {
    pub tx_root: TxRoot,
    pub block_size: u64,
    /// Binary `DataRootKey`s of every data root placed in this block.
    pub data_root_keys: BTreeSet<Vec<u8>>,
}

/// `tx_index` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub abs_end: u64,
    pub tx_size: u64,
}

/// `disk_pool_chunks_index` value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPoolChunkRecord {
    pub chunk_offset_in_tx: u64,
    pub chunk_size: u64,
    pub data_root: DataRoot,
    pub tx_size: u64,
}

impl DiskPoolChunkRecord {
    pub fn data_root_key(&self) -> DataRootKey {
        DataRootKey::new(self.data_root, self.tx_size)
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_pool_keys_sort_by_timestamp_then_hash() {
        let h1 = DataPathHash::new([1u8; 32]);
        let h2 = DataPathHash::new([2u8; 32]);
        let a = disk_pool_key(Timestamp::new(100), &h2);
        let b = disk_pool_key(Timestamp::new(101), &h1);
        let c = disk_pool_key(Timestamp::new(101), &h2);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn disk_pool_key_round_trips() {
        let hash = DataPathHash::new([9u8; 32]);
        let key = disk_pool_key(Timestamp::new(42), &hash);
        assert_eq!(parse_disk_pool_key(&key), Some((Timestamp::new(42), hash)));
    }

    #[test]
    fn placements_remove_at_or_above() {
        let mut placements = DataRootPlacements::default();
        let root = TxRoot::new([1u8; 32]);
        placements.insert(root, 100, vec![1]);
        placements.insert(root, 200, vec![2]);
        assert!(!placements.remove_at_or_above(150));
        assert_eq!(placements.iter().count(), 1);
        assert!(placements.remove_at_or_above(0));
    }

    #[test]
    fn chunk_record_round_trips() {
        let record = ChunkRecord {
            data_path_hash: DataPathHash::new([1u8; 32]),
            tx_root: TxRoot::new([2u8; 32]),
            data_root: DataRoot::new([3u8; 32]),
            tx_path: vec![4, 5, 6],
            chunk_offset_in_tx: 7,
            chunk_size: 8,
        };
        let bytes = encode(&record).unwrap();
        assert_eq!(decode::<ChunkRecord>(&bytes).unwrap(), record);
    }
}

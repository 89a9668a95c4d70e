//! Sidecar persistence of the engine's in-memory state.
//!
//! The state file is a bincode tuple
//! `(sync_record, block_index, disk_pool, disk_pool_size, compacted_size)`.
//! Files written before `compacted_size` existed are 4-tuples; they are
//! accepted with the field defaulting to zero.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use loom_types::BlockEntry;

use crate::disk_pool::DiskPool;
use crate::error::EngineError;
use crate::interval_set::IntervalSet;

const STATE_FILE: &str = "sync_state.bin";

/// The persisted portion of the engine state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedState {
    pub sync_record: IntervalSet,
    pub block_index: Vec<BlockEntry>,
    pub disk_pool: DiskPool,
    pub disk_pool_size: u64,
    pub compacted_size: u64,
}

pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE)
}

/// Write the state file atomically (write-then-rename).
pub fn save(data_dir: &Path, state: &PersistedState) -> Result<(), EngineError> {
    let bytes = bincode::serialize(&(
        &state.sync_record,
        &state.block_index,
        &state.disk_pool,
        state.disk_pool_size,
        state.compacted_size,
    ))
    .map_err(|e| EngineError::Persistence(e.to_string()))?;

    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Persistence(e.to_string()))?;
    let tmp = data_dir.join(format!("{STATE_FILE}.tmp"));
    std::fs::write(&tmp, &bytes).map_err(|e| EngineError::Persistence(e.to_string()))?;
    std::fs::rename(&tmp, state_path(data_dir))
        .map_err(|e| EngineError::Persistence(e.to_string()))?;
    Ok(())
}

/// Load the state file. A missing file yields the default (fresh) state;
/// a legacy 4-tuple is accepted with `compacted_size = 0`.
pub fn load(data_dir: &Path) -> Result<PersistedState, EngineError> {
    let path = state_path(data_dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedState::default())
        }
        Err(e) => return Err(EngineError::Persistence(e.to_string())),
    };

    type Full = (IntervalSet, Vec<BlockEntry>, DiskPool, u64, u64);
    type Legacy = (IntervalSet, Vec<BlockEntry>, DiskPool, u64);

    if let Ok((sync_record, block_index, disk_pool, disk_pool_size, compacted_size)) =
        decode_exact::<Full>(&bytes)
    {
        return Ok(PersistedState {
            sync_record,
            block_index,
            disk_pool,
            disk_pool_size,
            compacted_size,
        });
    }
    let (sync_record, block_index, disk_pool, disk_pool_size) = decode_exact::<Legacy>(&bytes)
        .map_err(|e| EngineError::Persistence(format!("unreadable state file: {e}")))?;
    Ok(PersistedState {
        sync_record,
        block_index,
        disk_pool,
        disk_pool_size,
        compacted_size: 0,
    })
}

/// Deserialize requiring that every input byte is consumed, so a legacy
/// 4-tuple is never mistaken for a prefix of a 5-tuple.
fn decode_exact<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, bincode::Error> {
    let mut cursor = std::io::Cursor::new(bytes);
    let value: T = bincode::deserialize_from(&mut cursor)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(Box::new(bincode::ErrorKind::Custom(
            "trailing bytes".to_string(),
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_types::{BlockHash, DataRoot, DataRootKey, Timestamp, TxId, TxRoot};

    fn sample_state() -> PersistedState {
        let mut disk_pool = DiskPool::new();
        disk_pool.add_root(
            DataRootKey::new(DataRoot::new([1u8; 32]), 100),
            TxId::new([2u8; 32]),
            Timestamp::new(77),
        );
        PersistedState {
            sync_record: IntervalSet::from_pairs([(0, 10), (20, 30)]),
            block_index: vec![BlockEntry::new(
                BlockHash::new([3u8; 32]),
                1000,
                TxRoot::new([4u8; 32]),
            )],
            disk_pool,
            disk_pool_size: 256,
            compacted_size: 12,
        }
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        save(dir.path(), &state).unwrap();
        assert_eq!(load(dir.path()).unwrap(), state);
    }

    #[test]
    fn missing_file_is_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(dir.path()).unwrap(), PersistedState::default());
    }

    #[test]
    fn legacy_four_tuple_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        let legacy = bincode::serialize(&(
            &state.sync_record,
            &state.block_index,
            &state.disk_pool,
            state.disk_pool_size,
        ))
        .unwrap();
        std::fs::write(state_path(dir.path()), legacy).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.sync_record, state.sync_record);
        assert_eq!(loaded.disk_pool_size, state.disk_pool_size);
        assert_eq!(loaded.compacted_size, 0);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(state_path(dir.path()), b"garbage").unwrap();
        assert!(load(dir.path()).is_err());
    }
}

//! The `store_data_in_v2_index` migration.
//!
//! Early deployments kept chunk bodies in a file-per-hash directory and
//! only the data path in `chunk_data_index`. The migration walks
//! `chunks_index` cyclically, folds each legacy file into its
//! `chunk_data_index` row, deletes the file, and persists the cursor in
//! `migrations_index` after every step. Read paths consult the legacy
//! store only until the completion marker is written.

use std::path::PathBuf;

use loom_types::DataPathHash;

/// Name of the migration, and its `migrations_index` key.
pub const STORE_DATA_IN_V2_INDEX: &str = "store_data_in_v2_index";

/// Progress marker value meaning the migration has finished.
pub const MARKER_COMPLETE: &[u8] = b"complete";

/// The legacy file-per-hash chunk store.
pub trait LegacyChunkStore: Send + Sync {
    fn read(&self, hash: &DataPathHash) -> std::io::Result<Option<Vec<u8>>>;

    fn remove(&self, hash: &DataPathHash) -> std::io::Result<()>;
}

/// Legacy store layout: one file per chunk, named by the hex data-path
/// hash, all in a single directory.
pub struct FsChunkStore {
    dir: PathBuf,
}

impl FsChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, hash: &DataPathHash) -> PathBuf {
        self.dir.join(hex::encode(hash.as_bytes()))
    }
}

impl LegacyChunkStore for FsChunkStore {
    fn read(&self, hash: &DataPathHash) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, hash: &DataPathHash) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(hash)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path());
        let hash = DataPathHash::new([5u8; 32]);

        assert_eq!(store.read(&hash).unwrap(), None);
        std::fs::write(dir.path().join(hex::encode(hash.as_bytes())), b"chunk").unwrap();
        assert_eq!(store.read(&hash).unwrap(), Some(b"chunk".to_vec()));
        store.remove(&hash).unwrap();
        assert_eq!(store.read(&hash).unwrap(), None);
        // Removing twice is fine.
        store.remove(&hash).unwrap();
    }
}

//! LMDB environment setup and the `KvStore` implementation.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use loom_store::{KvStore, StoreError, Table};

use crate::LmdbError;

/// Number of named LMDB databases (one per [`Table`]).
const MAX_DBS: u32 = 9;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Arc<Env>,

    chunks_index_db: Database<Bytes, Bytes>,
    chunk_data_index_db: Database<Bytes, Bytes>,
    data_root_index_db: Database<Bytes, Bytes>,
    data_root_offset_index_db: Database<Bytes, Bytes>,
    tx_index_db: Database<Bytes, Bytes>,
    tx_offset_index_db: Database<Bytes, Bytes>,
    disk_pool_chunks_index_db: Database<Bytes, Bytes>,
    missing_chunks_index_db: Database<Bytes, Bytes>,
    migrations_index_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)
            .map_err(|e| LmdbError::Heed(format!("failed to create directory: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(MAX_DBS)
                .map_size(map_size)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;

        let chunks_index_db = env.create_database(&mut wtxn, Some(Table::ChunksIndex.name()))?;
        let chunk_data_index_db =
            env.create_database(&mut wtxn, Some(Table::ChunkDataIndex.name()))?;
        let data_root_index_db =
            env.create_database(&mut wtxn, Some(Table::DataRootIndex.name()))?;
        let data_root_offset_index_db =
            env.create_database(&mut wtxn, Some(Table::DataRootOffsetIndex.name()))?;
        let tx_index_db = env.create_database(&mut wtxn, Some(Table::TxIndex.name()))?;
        let tx_offset_index_db =
            env.create_database(&mut wtxn, Some(Table::TxOffsetIndex.name()))?;
        let disk_pool_chunks_index_db =
            env.create_database(&mut wtxn, Some(Table::DiskPoolChunksIndex.name()))?;
        let missing_chunks_index_db =
            env.create_database(&mut wtxn, Some(Table::MissingChunksIndex.name()))?;
        let migrations_index_db =
            env.create_database(&mut wtxn, Some(Table::MigrationsIndex.name()))?;

        wtxn.commit()?;

        Ok(Self {
            env: Arc::new(env),
            chunks_index_db,
            chunk_data_index_db,
            data_root_index_db,
            data_root_offset_index_db,
            tx_index_db,
            tx_offset_index_db,
            disk_pool_chunks_index_db,
            missing_chunks_index_db,
            migrations_index_db,
        })
    }

    fn db(&self, table: Table) -> Database<Bytes, Bytes> {
        match table {
            Table::ChunksIndex => self.chunks_index_db,
            Table::ChunkDataIndex => self.chunk_data_index_db,
            Table::DataRootIndex => self.data_root_index_db,
            Table::DataRootOffsetIndex => self.data_root_offset_index_db,
            Table::TxIndex => self.tx_index_db,
            Table::TxOffsetIndex => self.tx_offset_index_db,
            Table::DiskPoolChunksIndex => self.disk_pool_chunks_index_db,
            Table::MissingChunksIndex => self.missing_chunks_index_db,
            Table::MigrationsIndex => self.migrations_index_db,
        }
    }

    /// Get a shared reference to the underlying heed environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Force an `fsync` of the LMDB memory-mapped file to disk.
    ///
    /// LMDB ensures durability on every write-transaction commit; this is an
    /// extra flush for graceful shutdown.
    pub fn force_sync(&self) -> Result<(), LmdbError> {
        let wtxn = self.env.write_txn()?;
        wtxn.commit()?;
        Ok(())
    }
}

impl KvStore for LmdbEnvironment {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let val = self
            .db(table)
            .get(&rtxn, key)
            .map_err(LmdbError::from)?
            .map(|v| v.to_vec());
        Ok(val)
    }

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db(table)
            .put(&mut wtxn, key, value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db(table)
            .delete(&mut wtxn, key)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete_range(&self, table: Table, lo: &[u8], hi: &[u8]) -> Result<(), StoreError> {
        // Collect the keys first: LMDB permits a single write transaction,
        // and deleting while iterating invalidates the cursor.
        let keys: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
            let bounds = (Bound::Included(lo), Bound::Excluded(hi));
            let iter = self
                .db(table)
                .range(&rtxn, &bounds)
                .map_err(LmdbError::from)?;
            let mut keys = Vec::new();
            for result in iter {
                let (key, _val) = result.map_err(LmdbError::from)?;
                keys.push(key.to_vec());
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        for key in &keys {
            self.db(table)
                .delete(&mut wtxn, key)
                .map_err(LmdbError::from)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_next(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(key), Bound::Unbounded);
        let mut iter = self
            .db(table)
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        match iter.next() {
            Some(result) => {
                let (k, v) = result.map_err(LmdbError::from)?;
                Ok(Some((k.to_vec(), v.to_vec())))
            }
            None => Ok(None),
        }
    }

    fn get_prev(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Unbounded, Bound::Included(key));
        let mut iter = self
            .db(table)
            .rev_range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        match iter.next() {
            Some(result) => {
                let (k, v) = result.map_err(LmdbError::from)?;
                Ok(Some((k.to_vec(), v.to_vec())))
            }
            None => Ok(None),
        }
    }

    fn get_range(
        &self,
        table: Table,
        lo: &[u8],
        hi: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bounds = (Bound::Included(lo), Bound::Excluded(hi));
        let iter = self
            .db(table)
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for result in iter {
            let (k, v) = result.map_err(LmdbError::from)?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn count(&self, table: Table) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let count = self.db(table).len(&rtxn).map_err(LmdbError::from)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Default map size for test environments: 64 MiB.
    const TEST_MAP_SIZE: usize = 64 << 20;

    fn open_test_env() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = LmdbEnvironment::open(dir.path(), TEST_MAP_SIZE).expect("open env");
        (dir, env)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, env) = open_test_env();
        env.put(Table::TxIndex, b"key", b"value").unwrap();
        assert_eq!(
            env.get(Table::TxIndex, b"key").unwrap(),
            Some(b"value".to_vec())
        );
        env.delete(Table::TxIndex, b"key").unwrap();
        assert_eq!(env.get(Table::TxIndex, b"key").unwrap(), None);
    }

    #[test]
    fn delete_absent_key_is_noop() {
        let (_dir, env) = open_test_env();
        env.delete(Table::TxIndex, b"missing").unwrap();
    }

    #[test]
    fn tables_are_isolated() {
        let (_dir, env) = open_test_env();
        env.put(Table::TxIndex, b"key", b"tx").unwrap();
        env.put(Table::ChunksIndex, b"key", b"chunk").unwrap();
        assert_eq!(env.get(Table::TxIndex, b"key").unwrap(), Some(b"tx".to_vec()));
        assert_eq!(
            env.get(Table::ChunksIndex, b"key").unwrap(),
            Some(b"chunk".to_vec())
        );
    }

    #[test]
    fn get_next_and_prev() {
        let (_dir, env) = open_test_env();
        for k in [10u64, 20, 30] {
            env.put(Table::ChunksIndex, &k.to_be_bytes(), b"v").unwrap();
        }
        let (k, _) = env
            .get_next(Table::ChunksIndex, &15u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(k, 20u64.to_be_bytes().to_vec());

        let (k, _) = env
            .get_prev(Table::ChunksIndex, &15u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(k, 10u64.to_be_bytes().to_vec());

        assert!(env
            .get_next(Table::ChunksIndex, &31u64.to_be_bytes())
            .unwrap()
            .is_none());
        assert!(env
            .get_prev(Table::ChunksIndex, &9u64.to_be_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn get_range_is_half_open() {
        let (_dir, env) = open_test_env();
        for k in [10u64, 20, 30] {
            env.put(Table::ChunksIndex, &k.to_be_bytes(), b"v").unwrap();
        }
        let entries = env
            .get_range(
                Table::ChunksIndex,
                &10u64.to_be_bytes(),
                &30u64.to_be_bytes(),
            )
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn delete_range_removes_inside_only() {
        let (_dir, env) = open_test_env();
        for k in [10u64, 20, 30, 40] {
            env.put(Table::ChunksIndex, &k.to_be_bytes(), b"v").unwrap();
        }
        env.delete_range(
            Table::ChunksIndex,
            &15u64.to_be_bytes(),
            &35u64.to_be_bytes(),
        )
        .unwrap();
        assert_eq!(env.count(Table::ChunksIndex).unwrap(), 2);
        assert!(env
            .get(Table::ChunksIndex, &10u64.to_be_bytes())
            .unwrap()
            .is_some());
        assert!(env
            .get(Table::ChunksIndex, &40u64.to_be_bytes())
            .unwrap()
            .is_some());
    }

    #[test]
    fn cyclic_iteration_wraps() {
        let (_dir, env) = open_test_env();
        for k in [10u64, 20] {
            env.put(Table::DiskPoolChunksIndex, &k.to_be_bytes(), b"v")
                .unwrap();
        }
        let first = env
            .iter_from(Table::DiskPoolChunksIndex, &[])
            .unwrap()
            .unwrap();
        assert_eq!(first.key, 10u64.to_be_bytes().to_vec());
        let second = env
            .iter_from(Table::DiskPoolChunksIndex, &first.next)
            .unwrap()
            .unwrap();
        assert_eq!(second.key, 20u64.to_be_bytes().to_vec());
        // Past the last key the cursor wraps back to the first entry.
        let third = env
            .iter_from(Table::DiskPoolChunksIndex, &second.next)
            .unwrap()
            .unwrap();
        assert_eq!(third.key, first.key);
    }

    #[test]
    fn iter_from_on_empty_table_is_none() {
        let (_dir, env) = open_test_env();
        assert!(env.iter_from(Table::MissingChunksIndex, &[]).unwrap().is_none());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let env = LmdbEnvironment::open(dir.path(), TEST_MAP_SIZE).unwrap();
            env.put(Table::MigrationsIndex, b"marker", b"complete").unwrap();
            env.force_sync().unwrap();
        }
        let env = LmdbEnvironment::open(dir.path(), TEST_MAP_SIZE).unwrap();
        assert_eq!(
            env.get(Table::MigrationsIndex, b"marker").unwrap(),
            Some(b"complete".to_vec())
        );
    }
}

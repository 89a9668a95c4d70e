//! Nullable store — thread-safe in-memory `KvStore` for testing.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use loom_store::{KvStore, StoreError, Table};

/// An in-memory key-value store with the same ordering semantics as the
/// LMDB backend. Thread-safe for use with tokio's multi-threaded runtime.
pub struct MemKv {
    tables: Mutex<HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemKv {
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        for table in Table::ALL {
            tables.insert(table, BTreeMap::new());
        }
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Snapshot every key of a table (test assertions).
    pub fn keys(&self, table: Table) -> Vec<Vec<u8>> {
        self.tables.lock().unwrap()[&table].keys().cloned().collect()
    }
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemKv {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.lock().unwrap()[&table].get(key).cloned())
    }

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .get_mut(&table)
            .expect("all tables exist")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .get_mut(&table)
            .expect("all tables exist")
            .remove(key);
        Ok(())
    }

    fn delete_range(&self, table: Table, lo: &[u8], hi: &[u8]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let map = tables.get_mut(&table).expect("all tables exist");
        let keys: Vec<Vec<u8>> = map
            .range::<[u8], _>((Bound::Included(lo), Bound::Excluded(hi)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            map.remove(&key);
        }
        Ok(())
    }

    fn get_next(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self.tables.lock().unwrap()[&table]
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn get_prev(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self.tables.lock().unwrap()[&table]
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn get_range(
        &self,
        table: Table,
        lo: &[u8],
        hi: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self.tables.lock().unwrap()[&table]
            .range::<[u8], _>((Bound::Included(lo), Bound::Excluded(hi)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(&self, table: Table) -> Result<u64, StoreError> {
        Ok(self.tables.lock().unwrap()[&table].len() as u64)
    }
}

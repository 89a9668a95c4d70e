//! The ordered binary key-value store interface.

use crate::{StoreError, Table};

/// One step of a cyclic table walk: the entry under (or after) the cursor,
/// plus the cursor for the following step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CyclicEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Cursor that yields the next entry; wraps to the smallest key after
    /// the last entry has been visited.
    pub next: Vec<u8>,
}

/// Ordered binary-key/binary-value store with nine named tables.
///
/// Implementations must keep keys sorted bytewise; all range bounds below
/// are `[lo, hi)` half-open unless stated otherwise.
pub trait KvStore: Send + Sync {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is a no-op.
    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError>;

    /// Delete every entry with `lo <= key < hi`.
    fn delete_range(&self, table: Table, lo: &[u8], hi: &[u8]) -> Result<(), StoreError>;

    /// First entry with key >= `key`, if any.
    fn get_next(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Last entry with key <= `key`, if any.
    fn get_prev(&self, table: Table, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// All entries with `lo <= key < hi`, in key order.
    fn get_range(
        &self,
        table: Table,
        lo: &[u8],
        hi: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Cyclic iteration: the first entry with key >= `cursor`, wrapping to
    /// the smallest key when the cursor is past the end. `None` only when
    /// the table is empty.
    fn iter_from(&self, table: Table, cursor: &[u8]) -> Result<Option<CyclicEntry>, StoreError> {
        let entry = match self.get_next(table, cursor)? {
            Some(entry) => Some(entry),
            None => self.get_next(table, &[])?,
        };
        Ok(entry.map(|(key, value)| {
            let mut next = key.clone();
            next.push(0);
            CyclicEntry { key, value, next }
        }))
    }

    /// Number of entries in the table.
    fn count(&self, table: Table) -> Result<u64, StoreError>;
}

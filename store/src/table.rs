//! The nine column families of the chunk store.

use std::fmt;

/// Names one of the engine's tables. Integer keys are big-endian so that the
/// byte order of keys matches their numeric order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// `u64 absolute end offset` → chunk metadata.
    ChunksIndex,
    /// `data_path_hash` → `(chunk_bytes, data_path_bytes)`.
    ChunkDataIndex,
    /// `data_root ++ u64 tx_size` → tx-root/tx-path placements.
    DataRootIndex,
    /// `u64 block start offset` → `(tx_root, block_size, data_root_key set)`.
    DataRootOffsetIndex,
    /// `tx_id` → `(absolute tx end offset, tx_size)`.
    TxIndex,
    /// `u64 absolute tx start offset` → `tx_id`.
    TxOffsetIndex,
    /// `u256 timestamp ++ data_path_hash` → staged chunk metadata.
    DiskPoolChunksIndex,
    /// `u64 interval end` → `u64 interval start` (compacted-away ranges).
    MissingChunksIndex,
    /// migration name → opaque progress marker.
    MigrationsIndex,
}

impl Table {
    /// Every table, in the order the backend creates them.
    pub const ALL: [Table; 9] = [
        Table::ChunksIndex,
        Table::ChunkDataIndex,
        Table::DataRootIndex,
        Table::DataRootOffsetIndex,
        Table::TxIndex,
        Table::TxOffsetIndex,
        Table::DiskPoolChunksIndex,
        Table::MissingChunksIndex,
        Table::MigrationsIndex,
    ];

    /// The backend-facing name of the column family.
    pub fn name(&self) -> &'static str {
        match self {
            Table::ChunksIndex => "chunks_index",
            Table::ChunkDataIndex => "chunk_data_index",
            Table::DataRootIndex => "data_root_index",
            Table::DataRootOffsetIndex => "data_root_offset_index",
            Table::TxIndex => "tx_index",
            Table::TxOffsetIndex => "tx_offset_index",
            Table::DiskPoolChunksIndex => "disk_pool_chunks_index",
            Table::MissingChunksIndex => "missing_chunks_index",
            Table::MigrationsIndex => "migrations_index",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = Table::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
    }
}

//! Read-only access to the chunk store.
//!
//! Reads never go through the engine's mailbox: a [`SyncReader`] holds the
//! shared store handle directly, the way the HTTP layer holds table
//! handles. Readers may observe a slightly older state than the engine,
//! never an inconsistent one — every multi-table update writes the
//! authoritative table last.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_store::{KvStore, Table};
use loom_types::{DataPathHash, TxId, TxRoot, MAX_SERVED_TX_DATA_SIZE};

use crate::error::ReadError;
use crate::migration::LegacyChunkStore;
use crate::proof::ChunkProof;
use crate::tables::{
    decode, offset_key, parse_offset_key, BlockOffsetRecord, ChunkData, ChunkRecord, TxRecord,
};

/// Flags shared between the engine and its readers.
#[derive(Debug, Default)]
pub struct SharedFlags {
    joined: AtomicBool,
    migration_complete: AtomicBool,
}

impl SharedFlags {
    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    pub fn set_joined(&self) {
        self.joined.store(true, Ordering::Release);
    }

    pub fn is_migration_complete(&self) -> bool {
        self.migration_complete.load(Ordering::Acquire)
    }

    pub fn set_migration_complete(&self) {
        self.migration_complete.store(true, Ordering::Release);
    }
}

/// Cloneable read-only handle over the chunk store.
#[derive(Clone)]
pub struct SyncReader {
    kv: Arc<dyn KvStore>,
    flags: Arc<SharedFlags>,
    legacy: Option<Arc<dyn LegacyChunkStore>>,
}

impl SyncReader {
    pub fn new(
        kv: Arc<dyn KvStore>,
        flags: Arc<SharedFlags>,
        legacy: Option<Arc<dyn LegacyChunkStore>>,
    ) -> Self {
        Self { kv, flags, legacy }
    }

    fn ensure_joined(&self) -> Result<(), ReadError> {
        if self.flags.is_joined() {
            Ok(())
        } else {
            Err(ReadError::NotJoined)
        }
    }

    /// The proof for the chunk covering the given absolute offset.
    pub fn get_chunk(&self, offset: u64) -> Result<ChunkProof, ReadError> {
        self.ensure_joined()?;
        let (key, value) = self
            .kv
            .get_next(Table::ChunksIndex, &offset_key(offset))?
            .ok_or(ReadError::ChunkNotFound)?;
        let end = parse_offset_key(&key).ok_or(ReadError::FailedToReadChunk)?;
        let record: ChunkRecord = decode(&value)?;
        if end - record.chunk_size >= offset {
            return Err(ReadError::ChunkNotFound);
        }

        let data = self.read_chunk_data(&record.data_path_hash)?;
        // The transaction's size falls out of re-validating the stored tx
        // path against the enclosing block; no tx-index row is needed, so
        // peer-synced ranges serve proofs too.
        let (block_start, block) = self.block_covering(end)?;
        let tx_bounds = loom_merkle::validate_path(
            block.tx_root.as_bytes(),
            end - block_start - 1,
            block.block_size,
            &record.tx_path,
        )
        .ok_or(ReadError::FailedToReadChunk)?;
        Ok(ChunkProof {
            chunk: data.chunk,
            data_path: data.data_path,
            data_root: record.data_root,
            data_size: tx_bounds.end - tx_bounds.start,
            offset: end,
            tx_path: Some(record.tx_path),
        })
    }

    /// The block-offset row covering the given absolute offset.
    fn block_covering(&self, offset: u64) -> Result<(u64, BlockOffsetRecord), ReadError> {
        if offset == 0 {
            return Err(ReadError::NotFound);
        }
        let (key, value) = self
            .kv
            .get_prev(Table::DataRootOffsetIndex, &offset_key(offset - 1))?
            .ok_or(ReadError::NotFound)?;
        let block_start = parse_offset_key(&key).ok_or(ReadError::Store("bad key".into()))?;
        let record: BlockOffsetRecord = decode(&value)?;
        if offset > block_start + record.block_size {
            return Err(ReadError::NotFound);
        }
        Ok((block_start, record))
    }

    /// The tx root of the block covering the given absolute offset.
    pub fn get_tx_root(&self, offset: u64) -> Result<TxRoot, ReadError> {
        self.ensure_joined()?;
        let (_, record) = self.block_covering(offset)?;
        Ok(record.tx_root)
    }

    /// A transaction's end offset and size.
    pub fn get_tx_offset(&self, tx_id: &TxId) -> Result<TxRecord, ReadError> {
        self.ensure_joined()?;
        let value = self
            .kv
            .get(Table::TxIndex, tx_id.as_bytes())?
            .ok_or(ReadError::NotFound)?;
        Ok(decode(&value)?)
    }

    /// Reassemble a transaction's payload from its chunks, in weave order.
    pub fn get_tx_data(&self, tx_id: &TxId) -> Result<Vec<u8>, ReadError> {
        let tx = self.get_tx_offset(tx_id)?;
        if tx.tx_size == 0 {
            return Ok(Vec::new());
        }
        if tx.tx_size > MAX_SERVED_TX_DATA_SIZE {
            return Err(ReadError::TxDataTooBig);
        }

        let start = tx.abs_end - tx.tx_size;
        let mut data = Vec::with_capacity(tx.tx_size as usize);
        let mut cursor = start;
        while cursor < tx.abs_end {
            let (key, value) = self
                .kv
                .get_next(Table::ChunksIndex, &offset_key(cursor + 1))?
                .ok_or(ReadError::ChunkNotFound)?;
            let end = parse_offset_key(&key).ok_or(ReadError::FailedToGetTxData)?;
            let record: ChunkRecord = decode(&value)?;
            if end > tx.abs_end || end - record.chunk_size != cursor {
                // Gap inside the transaction's range.
                return Err(ReadError::ChunkNotFound);
            }
            let chunk = self
                .read_chunk_data(&record.data_path_hash)
                .map_err(|_| ReadError::FailedToGetTxData)?;
            data.extend_from_slice(&chunk.chunk);
            cursor = end;
        }
        Ok(data)
    }

    /// Chunk bytes plus data path, falling back to the legacy file store
    /// while the v2 migration is still running.
    fn read_chunk_data(&self, hash: &DataPathHash) -> Result<ChunkData, ReadError> {
        let value = self
            .kv
            .get(Table::ChunkDataIndex, hash.as_bytes())?
            .ok_or(ReadError::FailedToReadChunk)?;
        let mut data: ChunkData = decode(&value)?;
        if data.chunk.is_empty() && !self.flags.is_migration_complete() {
            if let Some(legacy) = &self.legacy {
                if let Ok(Some(bytes)) = legacy.read(hash) {
                    data.chunk = bytes;
                }
            }
        }
        if data.chunk.is_empty() {
            return Err(ReadError::FailedToReadChunk);
        }
        Ok(data)
    }
}

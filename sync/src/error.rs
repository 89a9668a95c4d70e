//! Error taxonomy exposed by the engine.

use thiserror::Error;

/// Failures of the blocking `add_chunk` call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddChunkError {
    #[error("engine has not joined the network yet")]
    NotJoined,

    #[error("merkle proof or size check failed")]
    InvalidProof,

    #[error("no path from the supplied data root to a confirmed placement")]
    DataRootNotFound,

    #[error("disk pool size limit exceeded")]
    ExceedsDiskPoolSizeLimit,

    #[error("not enough free disk space")]
    DiskFull,

    #[error("engine did not respond within the caller deadline")]
    Timeout,

    #[error("store error: {0}")]
    Store(String),
}

/// Failures of the read-only lookup paths.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("engine has not joined the network yet")]
    NotJoined,

    #[error("not found")]
    NotFound,

    #[error("no chunk covers the requested offset")]
    ChunkNotFound,

    #[error("chunk record exists but its bytes could not be read")]
    FailedToReadChunk,

    #[error("transaction data could not be assembled")]
    FailedToGetTxData,

    #[error("transaction data exceeds the served size limit")]
    TxDataTooBig,

    #[error("store error: {0}")]
    Store(String),
}

/// Engine-internal fatal conditions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no common ancestor between the current and the new block index")]
    NoCommonAncestor,

    #[error("store error: {0}")]
    Store(#[from] loom_store::StoreError),

    #[error("state file error: {0}")]
    Persistence(String),
}

impl From<loom_store::StoreError> for AddChunkError {
    fn from(e: loom_store::StoreError) -> Self {
        AddChunkError::Store(e.to_string())
    }
}

impl From<loom_store::StoreError> for ReadError {
    fn from(e: loom_store::StoreError) -> Self {
        ReadError::Store(e.to_string())
    }
}

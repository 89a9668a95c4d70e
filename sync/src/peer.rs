//! P2P client interface for chunk and sync-record retrieval.
//!
//! The engine never performs network I/O itself: it hands a clone of the
//! client to a short-lived blocking task and consumes the result as a
//! message.

use thiserror::Error;

use loom_types::PeerAddr;

/// A chunk as served by a remote peer: the body plus both proof paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedChunk {
    pub chunk: Vec<u8>,
    pub data_path: Vec<u8>,
    pub tx_path: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer does not have the requested chunk")]
    NotFound,

    #[error("malformed peer response: {0}")]
    Malformed(String),
}

/// The node's HTTP client towards other peers.
pub trait PeerClient: Send + Sync {
    /// Currently known peers, in no particular order.
    fn peers(&self) -> Vec<PeerAddr>;

    /// The peer's published sync record as `(start, end)` interval pairs.
    fn fetch_sync_record(&self, peer: &PeerAddr) -> Result<Vec<(u64, u64)>, PeerError>;

    /// The chunk covering the given absolute weave offset.
    fn fetch_chunk(&self, peer: &PeerAddr, offset: u64) -> Result<FetchedChunk, PeerError>;
}

//! Chunk proof validation and the JSON boundary format.
//!
//! A full chunk proof nests two Merkle paths: the tx path authenticates a
//! transaction's data root (the leaf hash of the block's tx tree) and its
//! byte range within the block; the data path authenticates the chunk hash
//! and its byte range within the transaction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use loom_merkle::{validate_path, PathBounds};
use loom_types::{DataPathHash, DataRoot, TxRoot, MAX_CHUNK_BYTES};

/// SHA-256 of a chunk body — the leaf hash of the transaction's data tree.
pub fn chunk_hash(chunk: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chunk);
    hasher.finalize().into()
}

/// SHA-256 of a data path — the content identity of a stored chunk.
pub fn data_path_hash(data_path: &[u8]) -> DataPathHash {
    let mut hasher = Sha256::new();
    hasher.update(data_path);
    DataPathHash::new(hasher.finalize().into())
}

/// A fully validated two-level proof for a fetched chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidChunk {
    /// The data root recovered from the tx-path leaf.
    pub data_root: DataRoot,
    /// Transaction byte range within the block, `(start, end]`.
    pub tx_start_in_block: u64,
    pub tx_end_in_block: u64,
    /// Chunk byte range within the transaction, `(start, end]`.
    pub chunk_start_in_tx: u64,
    pub chunk_end_in_tx: u64,
}

/// Validate a single data path against a data root: the chunk must hash to
/// the authenticated leaf, start where the caller claims, and fit the size
/// bounds. `offset_in_tx` is the byte offset of the chunk's first byte.
pub fn validate_data_path(
    data_root: &DataRoot,
    offset_in_tx: u64,
    tx_size: u64,
    chunk: &[u8],
    data_path: &[u8],
) -> Option<PathBounds> {
    let bounds = validate_path(data_root.as_bytes(), offset_in_tx, tx_size, data_path)?;
    if bounds.start != offset_in_tx {
        return None;
    }
    check_chunk(chunk, &bounds)?;
    Some(bounds)
}

/// Validate the nested proof of a chunk fetched from a peer.
///
/// `offset_in_block` is any byte of the chunk, relative to the block start;
/// `block_size` is the block's weave span.
pub fn validate_chunk_proof(
    tx_root: &TxRoot,
    offset_in_block: u64,
    block_size: u64,
    chunk: &[u8],
    tx_path: &[u8],
    data_path: &[u8],
) -> Option<ValidChunk> {
    let tx_bounds = validate_path(tx_root.as_bytes(), offset_in_block, block_size, tx_path)?;
    let data_root = DataRoot::new(tx_bounds.leaf_hash);
    let tx_size = tx_bounds.end - tx_bounds.start;

    let offset_in_tx = offset_in_block - tx_bounds.start;
    let chunk_bounds = validate_path(data_root.as_bytes(), offset_in_tx, tx_size, data_path)?;
    check_chunk(chunk, &chunk_bounds)?;

    Some(ValidChunk {
        data_root,
        tx_start_in_block: tx_bounds.start,
        tx_end_in_block: tx_bounds.end,
        chunk_start_in_tx: chunk_bounds.start,
        chunk_end_in_tx: chunk_bounds.end,
    })
}

fn check_chunk(chunk: &[u8], bounds: &PathBounds) -> Option<()> {
    let size = bounds.end - bounds.start;
    if chunk.is_empty() || chunk.len() as u64 != size || size > MAX_CHUNK_BYTES {
        return None;
    }
    if chunk_hash(chunk) != bounds.leaf_hash {
        return None;
    }
    Some(())
}

/// A chunk proof as served to and accepted from the HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkProof {
    pub chunk: Vec<u8>,
    pub data_path: Vec<u8>,
    pub data_root: DataRoot,
    /// Size of the transaction the chunk belongs to.
    pub data_size: u64,
    /// Absolute end offset of the chunk within the weave.
    pub offset: u64,
    pub tx_path: Option<Vec<u8>>,
}

/// JSON wire form: binary fields base64url (no padding), integers as
/// decimal strings so 64-bit values survive lossy JSON number parsers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkProofJson {
    pub chunk: String,
    pub data_path: String,
    pub data_root: String,
    pub data_size: String,
    pub offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_path: Option<String>,
}

impl ChunkProof {
    pub fn to_json(&self) -> ChunkProofJson {
        ChunkProofJson {
            chunk: URL_SAFE_NO_PAD.encode(&self.chunk),
            data_path: URL_SAFE_NO_PAD.encode(&self.data_path),
            data_root: URL_SAFE_NO_PAD.encode(self.data_root.as_bytes()),
            data_size: self.data_size.to_string(),
            offset: self.offset.to_string(),
            tx_path: self.tx_path.as_ref().map(|p| URL_SAFE_NO_PAD.encode(p)),
        }
    }

    pub fn from_json(json: &ChunkProofJson) -> Option<Self> {
        let data_root = DataRoot::from_slice(&URL_SAFE_NO_PAD.decode(&json.data_root).ok()?)?;
        Some(Self {
            chunk: URL_SAFE_NO_PAD.decode(&json.chunk).ok()?,
            data_path: URL_SAFE_NO_PAD.decode(&json.data_path).ok()?,
            data_root,
            data_size: json.data_size.parse().ok()?,
            offset: json.offset.parse().ok()?,
            tx_path: match &json.tx_path {
                Some(p) => Some(URL_SAFE_NO_PAD.decode(p).ok()?),
                None => None,
            },
        })
    }
}

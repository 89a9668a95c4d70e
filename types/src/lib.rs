//! Fundamental types for the loom weave-sync engine.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: content hashes, weave offsets, block-index entries, peers,
//! timestamps, and the protocol constants.

pub mod block;
pub mod hash;
pub mod params;
pub mod peer;
pub mod time;

pub use block::{BlockEntry, SizeTaggedTx};
pub use hash::{BlockHash, DataPathHash, DataRoot, DataRootKey, TxId, TxRoot};
pub use params::{
    CONSULT_PEER_RECORDS_COUNT, EXTRA_INTERVALS_BEFORE_COMPACTION, MAX_CHUNK_BYTES,
    MAX_SERVED_TX_DATA_SIZE, MAX_SHARED_SYNCED_INTERVALS_COUNT, MIN_CHUNK_TO_PATH_RATIO,
    MISSING_PROBE_STEP, PICK_PEERS_OUT_OF_RANDOM_N, TRACK_CONFIRMATIONS,
};
pub use peer::PeerAddr;
pub use time::{Clock, SystemClock, Timestamp};

/// The inclusive end-offset of a chunk or transaction within the weave.
///
/// Every chunk occupies `(end - chunk_size, end]`; the offset names the
/// last byte, so offset 1 is the first byte of the weave.
pub type AbsoluteOffset = u64;

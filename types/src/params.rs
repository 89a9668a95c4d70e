//! Protocol constants for the chunk store and sync scheduler.

/// Hard upper bound on a chunk's byte length.
pub const MAX_CHUNK_BYTES: u64 = 262_144;

/// Maximum number of intervals a node shares from its sync record, and the
/// target the record is compacted down to.
pub const MAX_SHARED_SYNCED_INTERVALS_COUNT: usize = 10_000;

/// How many intervals beyond the shared cap may accumulate before a
/// compaction pass is scheduled.
pub const EXTRA_INTERVALS_BEFORE_COMPACTION: usize = 300;

/// How many recent block-index entries the engine keeps for reorg detection.
pub const TRACK_CONFIRMATIONS: usize = 50;

/// Number of peer sync records consulted when hunting for an interval.
pub const CONSULT_PEER_RECORDS_COUNT: usize = 5;

/// Size of the random peer sample the consulted records are drawn from.
pub const PICK_PEERS_OUT_OF_RANDOM_N: usize = 20;

/// Largest transaction payload the read path will assemble in one call.
pub const MAX_SERVED_TX_DATA_SIZE: u64 = MAX_CHUNK_BYTES * 100;

/// Step used when probing a missing interval for an already-present chunk.
pub const MISSING_PROBE_STEP: u64 = MAX_CHUNK_BYTES / 8;

/// Minimum acceptable ratio of chunk bytes to data-path bytes. Peers serving
/// chunks with pathologically deep proofs below this ratio are dropped.
pub const MIN_CHUNK_TO_PATH_RATIO: u64 = 10;

//! Chunked data synchronization engine for the loom weave.
//!
//! The weave is an append-only byte stream made of all transactions' data
//! in block order. This crate persists its chunks together with the
//! indices needed to serve Merkle proofs for any byte, downloads missing
//! ranges from peers, stages chunks of unconfirmed transactions in a
//! bounded disk pool, honours a content blacklist, and survives chain
//! reorganizations.
//!
//! The engine is a single actor (see [`engine::Engine`]); read paths go
//! through [`reader::SyncReader`] without touching its mailbox.

pub mod blacklist;
pub mod config;
pub mod disk_pool;
pub mod engine;
pub mod error;
pub mod interval_set;
pub mod logging;
pub mod metrics;
pub mod migration;
pub mod peer;
pub mod persistence;
pub mod proof;
pub mod reader;
pub mod record;
pub mod scheduler;
pub mod tables;

pub use blacklist::{parse_blacklist, BlacklistClient, NoBlacklist};
pub use config::{DiskSpace, SyncConfig, UnlimitedDiskSpace};
pub use disk_pool::{DataRootEntry, DiskPool};
pub use engine::{AddChunkRequest, Engine, EngineDeps, EngineHandle};
pub use error::{AddChunkError, EngineError, ReadError};
pub use interval_set::IntervalSet;
pub use logging::{init_logging, LogFormat};
pub use metrics::SyncMetrics;
pub use migration::{FsChunkStore, LegacyChunkStore};
pub use peer::{FetchedChunk, PeerClient, PeerError};
pub use proof::{ChunkProof, ChunkProofJson};
pub use reader::SyncReader;
pub use record::RecordFormat;

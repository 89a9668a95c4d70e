//! Abstract storage traits for the loom weave-sync engine.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.

pub mod error;
pub mod kv;
pub mod table;

pub use error::StoreError;
pub use kv::{CyclicEntry, KvStore};
pub use table::Table;

//! LMDB storage backend for the loom weave-sync engine.
//!
//! Implements the `KvStore` trait from `loom-store` using the `heed` LMDB
//! bindings. Each of the nine tables maps to one named LMDB database within
//! a single environment.

pub mod environment;
pub mod error;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;

//! Deterministic test doubles for the loom weave-sync engine.
//!
//! Nullables behave like the real collaborators but are fully in-memory and
//! controllable: the store keeps its tables in sorted maps, the clock only
//! advances when told to.

pub mod clock;
pub mod store;

pub use clock::NullClock;
pub use store::MemKv;

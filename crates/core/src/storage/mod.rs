//! Index storage: the in-memory engine and its snapshot encoding.
//!
//! All index content lives in an [`IndexEngine`]. Durability is not handled
//! here: the server's replicated log and snapshot files own it, and use
//! [`persistence`] to encode engine content and write files atomically.

/// The index engine and its lock-protected data.
pub mod engine;
/// Snapshot encoding with CRC32 footers and atomic file writes.
pub mod persistence;

pub use engine::{IndexData, IndexEngine, IndexStats};

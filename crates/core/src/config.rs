//! Global configuration constants for Lodestone.
//!
//! Tuning parameters, input validation limits, and node defaults live here.
//! These are compile-time constants; runtime configuration is handled via CLI
//! arguments and environment variables in the server's `main.rs`.

/// BM25 Okapi term frequency saturation parameter.
///
/// Controls how quickly term frequency saturates. Standard value is 1.2.
pub const BM25_K1: f32 = 1.2;

/// BM25 Okapi document length normalization parameter.
///
/// 0.0 = no normalization, 1.0 = full normalization. Standard value is 0.75.
pub const BM25_B: f32 = 0.75;

/// Tokens longer than this (in bytes) are dropped by the tokenizer.
pub const MAX_TOKEN_LEN: usize = 64;

/// Maximum length of a document id in bytes.
pub const MAX_DOC_ID_LEN: usize = 512;

/// Maximum number of fields per document.
pub const MAX_FIELDS: usize = 256;

/// Maximum length of a field name in bytes.
pub const MAX_FIELD_NAME_LEN: usize = 256;

/// Maximum number of elements in a list field.
pub const MAX_LIST_LEN: usize = 1_024;

/// Maximum total length of all text values in a document, in bytes.
pub const MAX_TEXT_LEN: usize = 1_000_000;

/// Default number of hits returned by a search.
pub const DEFAULT_SEARCH_SIZE: usize = 10;

/// Maximum number of hits (`size`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum pagination offset for search results.
pub const MAX_OFFSET: usize = 100_000;

/// Default HTTP port serving both the client API and peer RPC.
pub const DEFAULT_PORT: u16 = 7070;

/// Default directory for the raft log, vote, and snapshot files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default leader heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 250;

/// Default lower bound of the randomized election timeout in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 1_000;

/// Default upper bound of the randomized election timeout in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 2_000;

/// Number of applied entries since the last snapshot that triggers a new one.
/// 0 disables automatic snapshots.
pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 1_000;

/// Log entries kept after a snapshot so slightly lagging followers can catch
/// up without a full snapshot transfer.
pub const DEFAULT_LOGS_TO_KEEP: u64 = 500;

/// Default time a write waits for commit and local apply, in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum HTTP request body size in bytes for non-streaming endpoints (10 MB).
pub const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Maximum HTTP request body size for the NDJSON bulk endpoints (1 GB).
pub const MAX_BULK_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// Maximum number of concurrent in-flight requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 512;

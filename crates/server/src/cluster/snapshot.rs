//! Snapshot files.
//!
//! The latest snapshot lives in `snapshots/current.snap`:
//!
//! ```text
//! [u32 meta_len BE][SnapshotMeta JSON][exported index bytes]["LDS1"][u32 CRC32 BE]
//! ```
//!
//! A snapshot is written atomically before openraft is told it exists, so the
//! log is only ever purged behind a snapshot that is already on disk.

use crate::cluster::types::SnapshotMeta;
use lodestone_core::storage::persistence::{seal, unseal, write_atomic};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "current.snap";
const SNAPSHOT_MAGIC: &[u8; 4] = b"LDS1";

/// A snapshot held in memory: its metadata plus the exported index bytes.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

impl StoredSnapshot {
    fn encode(&self) -> io::Result<Vec<u8>> {
        let meta = serde_json::to_vec(&self.meta).map_err(io::Error::other)?;
        let mut out = Vec::with_capacity(4 + meta.len() + self.data.len() + 8);
        out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(&self.data);
        Ok(seal(out, SNAPSHOT_MAGIC))
    }

    fn decode(raw: &[u8]) -> io::Result<Self> {
        let payload = unseal(raw, SNAPSHOT_MAGIC)?;
        if payload.len() < 4 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "snapshot too short"));
        }
        let meta_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let body = &payload[4..];
        if body.len() < meta_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "snapshot metadata truncated",
            ));
        }
        let meta: SnapshotMeta = serde_json::from_slice(&body[..meta_len])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            meta,
            data: body[meta_len..].to_vec(),
        })
    }
}

/// The on-disk home of the current snapshot, with an in-memory copy.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    current: Option<StoredSnapshot>,
}

impl SnapshotStore {
    /// Opens `dir`, loading `current.snap` if present. A corrupt snapshot
    /// file is an error: the node must not start from damaged state.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(SNAPSHOT_FILE);
        let current = match fs::read(&path) {
            Ok(raw) => {
                let snapshot = StoredSnapshot::decode(&raw).map_err(|e| {
                    io::Error::new(e.kind(), format!("{}: {e}", path.display()))
                })?;
                tracing::info!(
                    snapshot_id = %snapshot.meta.snapshot_id,
                    last_log_id = ?snapshot.meta.last_log_id,
                    bytes = snapshot.data.len(),
                    "loaded snapshot"
                );
                Some(snapshot)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Self { path, current })
    }

    pub fn current(&self) -> Option<&StoredSnapshot> {
        self.current.as_ref()
    }

    /// Persists `snapshot` as the current one, replacing the previous file.
    ///
    /// Returns `false` without touching disk when the current snapshot already
    /// covers `snapshot.meta.last_log_id`: the log may have been purged up to
    /// the newer one, so it must never be replaced by an older one.
    pub fn save(&mut self, snapshot: StoredSnapshot) -> io::Result<bool> {
        if let Some(current) = &self.current {
            if snapshot.meta.last_log_id <= current.meta.last_log_id {
                tracing::debug!(
                    snapshot_id = %snapshot.meta.snapshot_id,
                    last_log_id = ?snapshot.meta.last_log_id,
                    current = ?current.meta.last_log_id,
                    "snapshot not newer than current, skipped"
                );
                return Ok(false);
            }
        }
        write_atomic(&self.path, &snapshot.encode()?)?;
        tracing::info!(
            snapshot_id = %snapshot.meta.snapshot_id,
            last_log_id = ?snapshot.meta.last_log_id,
            bytes = snapshot.data.len(),
            "snapshot persisted"
        );
        self.current = Some(snapshot);
        Ok(true)
    }
}

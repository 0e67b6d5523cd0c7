//! Persistent Raft log storage.
//!
//! Layout under the node's `raft/` directory:
//!
//! ```text
//! raft/
//! ├── log.bin     # framed entries: [u32 len BE][u32 CRC32 BE][JSON entry]
//! ├── vote.json   # last persisted vote
//! └── meta.json   # { last_purged_log_id, committed }
//! ```
//!
//! Appends are fsynced before openraft is told the entries are durable.
//! Truncation and purge rewrite `log.bin` atomically. A torn final frame (crash
//! mid-append) is dropped on open; a bad checksum anywhere else refuses to open.

use crate::cluster::types::{Entry, LogId, StorageError, TypeConfig, Vote};
use lodestone_core::storage::persistence::write_atomic;
use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{RaftLogReader, StorageIOError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const LOG_FILE: &str = "log.bin";
const VOTE_FILE: &str = "vote.json";
const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogMeta {
    last_purged_log_id: Option<LogId>,
    committed: Option<LogId>,
}

/// Durable Raft log, vote, and commit marker.
#[derive(Debug, Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

#[derive(Debug)]
struct LogStoreInner {
    dir: PathBuf,
    file: File,
    log: BTreeMap<u64, Entry>,
    meta: LogMeta,
    vote: Option<Vote>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| invalid(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn frame_entry(entry: &Entry, out: &mut Vec<u8>) -> io::Result<()> {
    let payload = serde_json::to_vec(entry).map_err(io::Error::other)?;
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Reads every intact frame of `log.bin`. Returns the entries above
/// `purged_upto` and the byte length of the intact prefix.
fn replay(path: &Path, purged_upto: Option<u64>) -> io::Result<(BTreeMap<u64, Entry>, u64)> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((BTreeMap::new(), 0)),
        Err(e) => return Err(e),
    };

    let mut log = BTreeMap::new();
    let mut offset = 0usize;
    while offset < raw.len() {
        let rest = &raw[offset..];
        if rest.len() < 8 {
            tracing::warn!(offset, "dropping torn raft log frame header");
            break;
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let stored_crc = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
        if rest.len() - 8 < len {
            tracing::warn!(offset, len, "dropping torn raft log frame");
            break;
        }
        let payload = &rest[8..8 + len];
        if crc32fast::hash(payload) != stored_crc {
            if offset + 8 + len == raw.len() {
                tracing::warn!(offset, "dropping raft log tail frame with bad checksum");
                break;
            }
            return Err(invalid(format!(
                "raft log checksum mismatch at offset {offset} in {}",
                path.display()
            )));
        }
        let entry: Entry = serde_json::from_slice(payload)
            .map_err(|e| invalid(format!("raft log entry at offset {offset}: {e}")))?;
        offset += 8 + len;
        if purged_upto.is_some_and(|p| entry.log_id.index <= p) {
            continue;
        }
        log.insert(entry.log_id.index, entry);
    }
    Ok((log, offset as u64))
}

impl LogStoreInner {
    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn write_entries(&mut self, entries: Vec<Entry>) -> io::Result<()> {
        let mut buf = Vec::new();
        for entry in &entries {
            frame_entry(entry, &mut buf)?;
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        for entry in entries {
            self.log.insert(entry.log_id.index, entry);
        }
        Ok(())
    }

    /// Replaces `log.bin` with exactly the entries held in memory.
    fn rewrite_log(&mut self) -> io::Result<()> {
        let mut buf = Vec::new();
        for entry in self.log.values() {
            frame_entry(entry, &mut buf)?;
        }
        let path = self.log_path();
        write_atomic(&path, &buf)?;
        self.file = OpenOptions::new().append(true).open(&path)?;
        Ok(())
    }

    fn save_meta(&self) -> io::Result<()> {
        let bytes = serde_json::to_vec(&self.meta).map_err(io::Error::other)?;
        write_atomic(&self.dir.join(META_FILE), &bytes)
    }
}

impl LogStore {
    /// Opens (or creates) the log in `dir`, replaying `log.bin`.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let meta: LogMeta = read_json(&dir.join(META_FILE))?.unwrap_or_default();
        let vote: Option<Vote> = read_json(&dir.join(VOTE_FILE))?;
        let path = dir.join(LOG_FILE);
        let (log, intact_len) = replay(&path, meta.last_purged_log_id.map(|l| l.index))?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() > intact_len {
            file.set_len(intact_len)?;
            file.sync_all()?;
        }

        tracing::info!(
            dir = %dir.display(),
            entries = log.len(),
            last_purged = ?meta.last_purged_log_id,
            "raft log opened"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(LogStoreInner {
                dir,
                file,
                log,
                meta,
                vote,
            })),
        })
    }

    /// `true` when this node has never voted, logged, or purged anything,
    /// i.e. it is safe to bootstrap a new cluster from it.
    pub async fn is_pristine(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.vote.is_none() && inner.log.is_empty() && inner.meta.last_purged_log_id.is_none()
    }

    async fn append_entries(&self, entries: Vec<Entry>) -> io::Result<()> {
        self.inner.lock().await.write_entries(entries)
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.log.range(range).map(|(_, e)| e.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError> {
        let inner = self.inner.lock().await;
        let last_purged_log_id = inner.meta.last_purged_log_id;
        let last_log_id = inner
            .log
            .values()
            .next_back()
            .map(|e| e.log_id)
            .or(last_purged_log_id);
        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let bytes = serde_json::to_vec(vote).map_err(|e| StorageIOError::write_vote(&e))?;
        write_atomic(&inner.dir.join(VOTE_FILE), &bytes)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        inner.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote>, StorageError> {
        Ok(self.inner.lock().await.vote)
    }

    async fn save_committed(&mut self, committed: Option<LogId>) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.meta.committed = committed;
        inner.save_meta().map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId>, StorageError> {
        Ok(self.inner.lock().await.meta.committed)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = Entry>,
    {
        self.append_entries(entries.into_iter().collect())
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        tracing::debug!(from = log_id.index, "truncating raft log");
        inner.log.split_off(&log_id.index);
        inner.rewrite_log().map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        tracing::debug!(upto = log_id.index, "purging raft log");
        // The purge marker goes first: entries at or below it are ignored on
        // replay even if the rewrite below never happens.
        inner.meta.last_purged_log_id = Some(log_id);
        inner.save_meta().map_err(|e| StorageIOError::write_logs(&e))?;
        inner.log = inner.log.split_off(&(log_id.index + 1));
        inner.rewrite_log().map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }
}

//! The replicated state machine: committed entries applied to the index engine.
//!
//! openraft calls [`RaftStateMachine::apply`] exactly once per committed entry,
//! in log order, from a single task. Apply holds the `applied` write lock for
//! the whole batch, and the snapshot builder holds its read lock while it
//! exports and persists, so a snapshot's content always matches its
//! `last_log_id` and an install never races a build to disk.

use crate::cluster::snapshot::{SnapshotStore, StoredSnapshot};
use crate::cluster::types::{
    Entry, LogEntry, LogEntryResponse, LogId, SnapshotMeta, StorageError, StoredMembership,
    TypeConfig,
};
use lodestone_core::storage::IndexEngine;
use openraft::storage::{RaftStateMachine, Snapshot};
use openraft::{EntryPayload, RaftSnapshotBuilder, StorageIOError};
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Default)]
struct AppliedState {
    last_applied: Option<LogId>,
    membership: StoredMembership,
}

/// State machine applying [`LogEntry`]s to an [`IndexEngine`].
#[derive(Debug)]
pub struct StateMachineStore {
    engine: IndexEngine,
    applied: RwLock<AppliedState>,
    snapshots: Mutex<SnapshotStore>,
    snapshot_idx: AtomicU64,
}

impl StateMachineStore {
    /// Opens the state machine, restoring the engine from the persisted
    /// snapshot in `snapshot_dir` if there is one.
    pub fn open(engine: IndexEngine, snapshot_dir: impl AsRef<Path>) -> io::Result<Self> {
        let snapshots = SnapshotStore::open(snapshot_dir)?;
        let mut applied = AppliedState::default();
        if let Some(snapshot) = snapshots.current() {
            let count = engine
                .import(&snapshot.data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            applied.last_applied = snapshot.meta.last_log_id;
            applied.membership = snapshot.meta.last_membership.clone();
            tracing::info!(
                documents = count,
                last_applied = ?applied.last_applied,
                "index restored from snapshot"
            );
        }
        Ok(Self {
            engine,
            applied: RwLock::new(applied),
            snapshots: Mutex::new(snapshots),
            snapshot_idx: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    /// The last membership applied on this node.
    pub async fn membership(&self) -> StoredMembership {
        self.applied.read().await.membership.clone()
    }

    pub async fn last_applied(&self) -> Option<LogId> {
        self.applied.read().await.last_applied
    }

    fn apply_entry(&self, log_id: &LogId, entry: &LogEntry) -> LogEntryResponse {
        let result = match entry {
            LogEntry::IndexDocument { document } => self.engine.upsert(document.clone()).map(drop),
            LogEntry::DeleteDocument { id } => self.engine.delete(id).map(drop),
        };
        match result {
            Ok(()) => LogEntryResponse::ok(),
            Err(e) => {
                tracing::warn!(
                    index = log_id.index,
                    op = entry.kind(),
                    error = %e,
                    "log entry rejected by index engine"
                );
                metrics::counter!("lodestone_apply_errors_total", "op" => entry.kind())
                    .increment(1);
                LogEntryResponse::failed(e.to_string())
            }
        }
    }

    fn next_snapshot_id(&self, last_applied: Option<LogId>) -> String {
        let idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        match last_applied {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, idx),
            None => format!("--{idx}"),
        }
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError> {
        // The read guard is held until the file is written so an install
        // cannot land between export and save.
        let applied = self.applied.read().await;
        let data = self
            .engine
            .export()
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let meta = SnapshotMeta {
            last_log_id: applied.last_applied,
            last_membership: applied.membership.clone(),
            snapshot_id: self.next_snapshot_id(applied.last_applied),
        };
        self.snapshots
            .lock()
            .await
            .save(StoredSnapshot {
                meta: meta.clone(),
                data: data.clone(),
            })
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;
        drop(applied);

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId>, StoredMembership), StorageError> {
        let applied = self.applied.read().await;
        Ok((applied.last_applied, applied.membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<LogEntryResponse>, StorageError>
    where
        I: IntoIterator<Item = Entry> + Send,
    {
        let mut applied = self.applied.write().await;
        let mut responses = Vec::new();
        for entry in entries {
            let resp = match &entry.payload {
                EntryPayload::Blank => LogEntryResponse::ok(),
                EntryPayload::Normal(log_entry) => self.apply_entry(&entry.log_id, log_entry),
                EntryPayload::Membership(mem) => {
                    tracing::info!(index = entry.log_id.index, membership = ?mem, "membership applied");
                    applied.membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    LogEntryResponse::ok()
                }
            };
            applied.last_applied = Some(entry.log_id);
            responses.push(resp);
        }
        if let Some(last) = applied.last_applied {
            metrics::gauge!("lodestone_last_applied_index").set(last.index as f64);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, StorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError> {
        let data = snapshot.into_inner();
        let mut applied = self.applied.write().await;

        let count = self
            .engine
            .import(&data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        self.snapshots
            .lock()
            .await
            .save(StoredSnapshot {
                meta: meta.clone(),
                data,
            })
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;

        applied.last_applied = meta.last_log_id;
        applied.membership = meta.last_membership.clone();
        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            last_log_id = ?meta.last_log_id,
            documents = count,
            "installed snapshot from leader"
        );
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError> {
        let snapshots = self.snapshots.lock().await;
        Ok(snapshots.current().map(|s| Snapshot {
            meta: s.meta.clone(),
            snapshot: Box::new(Cursor::new(s.data.clone())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::document::{Document, FieldValue};
    use lodestone_core::search::SearchRequest;
    use openraft::CommittedLeaderId;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn log_id(index: u64) -> LogId {
        LogId::new(CommittedLeaderId::new(1, 1), index)
    }

    fn doc(id: &str, body: &str) -> Document {
        Document::new(id, BTreeMap::new()).with_field("body", FieldValue::Text(body.into()))
    }

    fn normal(index: u64, entry: LogEntry) -> Entry {
        Entry {
            log_id: log_id(index),
            payload: EntryPayload::Normal(entry),
        }
    }

    fn index(index: u64, id: &str, body: &str) -> Entry {
        normal(index, LogEntry::IndexDocument { document: doc(id, body) })
    }

    fn delete(index: u64, id: &str) -> Entry {
        normal(index, LogEntry::DeleteDocument { id: id.into() })
    }

    fn open(dir: &Path) -> Arc<StateMachineStore> {
        Arc::new(StateMachineStore::open(IndexEngine::new(), dir).unwrap())
    }

    fn workload() -> Vec<Entry> {
        vec![
            index(1, "a", "raft log replication"),
            index(2, "b", "snapshot compaction"),
            index(3, "c", "leader election"),
            delete(4, "b"),
            index(5, "a", "raft consensus rewritten"),
            Entry {
                log_id: log_id(6),
                payload: EntryPayload::Blank,
            },
            index(7, "d", "membership change"),
        ]
    }

    #[tokio::test]
    async fn test_apply_mutates_engine_in_order() {
        let dir = TempDir::new().unwrap();
        let mut sm = open(dir.path());
        let responses = sm.apply(workload()).await.unwrap();
        assert_eq!(responses.len(), 7);
        assert!(responses.iter().all(|r| r.success));

        let engine = sm.engine();
        assert_eq!(engine.document_count(), 3);
        assert!(engine.get("b").is_none());
        let result = engine.search(&SearchRequest::text("rewritten")).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(sm.last_applied().await, Some(log_id(7)));
    }

    #[tokio::test]
    async fn test_apply_error_does_not_halt_log() {
        let dir = TempDir::new().unwrap();
        let mut sm = open(dir.path());
        let poisoned = doc("bad", "x").with_field("f", FieldValue::Float(f64::NAN));
        let responses = sm
            .apply(vec![
                index(1, "a", "first"),
                normal(2, LogEntry::IndexDocument { document: poisoned }),
                index(3, "c", "third"),
            ])
            .await
            .unwrap();
        assert!(responses[0].success);
        assert!(!responses[1].success);
        assert!(responses[1].error.is_some());
        assert!(responses[2].success);
        assert_eq!(sm.last_applied().await, Some(log_id(3)));
        assert_eq!(sm.engine().document_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_absent_is_success() {
        let dir = TempDir::new().unwrap();
        let mut sm = open(dir.path());
        let responses = sm.apply(vec![delete(1, "never-existed")]).await.unwrap();
        assert!(responses[0].success);
    }

    #[tokio::test]
    async fn test_snapshot_install_matches_full_replay() {
        let leader_dir = TempDir::new().unwrap();
        let mut leader = open(leader_dir.path());
        leader.apply(workload()).await.unwrap();
        let snapshot = leader.build_snapshot().await.unwrap();
        assert_eq!(snapshot.meta.last_log_id, Some(log_id(7)));

        let follower_dir = TempDir::new().unwrap();
        let mut follower = open(follower_dir.path());
        follower.apply(vec![index(1, "stale", "old state")]).await.unwrap();
        follower
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        assert_eq!(follower.last_applied().await, Some(log_id(7)));
        assert!(follower.engine().get("stale").is_none());
        assert_eq!(
            follower.engine().checksum().unwrap(),
            leader.engine().checksum().unwrap()
        );
    }

    #[tokio::test]
    async fn test_snapshot_then_suffix_equals_full_replay() {
        let full_dir = TempDir::new().unwrap();
        let mut full = open(full_dir.path());
        full.apply(workload()).await.unwrap();

        let split_dir = TempDir::new().unwrap();
        let mut split = open(split_dir.path());
        let mut entries = workload();
        let suffix = entries.split_off(4);
        split.apply(entries).await.unwrap();
        split.build_snapshot().await.unwrap();

        // A restarted node: snapshot restored from disk, then the log suffix replayed.
        let mut restored = open(split_dir.path());
        assert_eq!(restored.last_applied().await, Some(log_id(4)));
        restored.apply(suffix).await.unwrap();

        assert_eq!(
            restored.engine().checksum().unwrap(),
            full.engine().checksum().unwrap()
        );
    }

    #[tokio::test]
    async fn test_stale_build_cannot_overwrite_installed_snapshot() {
        let leader_dir = TempDir::new().unwrap();
        let mut leader = open(leader_dir.path());
        leader.apply(workload()).await.unwrap();
        let snapshot = leader.build_snapshot().await.unwrap();

        let follower_dir = TempDir::new().unwrap();
        {
            let mut follower = open(follower_dir.path());
            follower.apply(workload().into_iter().take(4)).await.unwrap();
            let stale = StoredSnapshot {
                meta: SnapshotMeta {
                    last_log_id: Some(log_id(4)),
                    last_membership: StoredMembership::default(),
                    snapshot_id: "1-4-1".into(),
                },
                data: follower.engine().export().unwrap(),
            };
            follower
                .install_snapshot(&snapshot.meta, snapshot.snapshot)
                .await
                .unwrap();

            // A builder that exported at index 4 finishing after the install.
            let saved = follower.snapshots.lock().await.save(stale).unwrap();
            assert!(!saved);
            assert_eq!(follower.last_applied().await, Some(log_id(7)));

            let rebuilt = follower.build_snapshot().await.unwrap();
            assert_eq!(rebuilt.meta.last_log_id, Some(log_id(7)));
        }

        let restored = open(follower_dir.path());
        assert_eq!(restored.last_applied().await, Some(log_id(7)));
        assert_eq!(restored.engine().document_count(), 3);
        assert_eq!(
            restored.engine().checksum().unwrap(),
            leader.engine().checksum().unwrap()
        );
    }

    #[tokio::test]
    async fn test_current_snapshot_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let mut sm = open(dir.path());
            assert!(sm.get_current_snapshot().await.unwrap().is_none());
            sm.apply(workload()).await.unwrap();
            sm.build_snapshot().await.unwrap();
        }
        let mut sm = open(dir.path());
        let current = sm.get_current_snapshot().await.unwrap().unwrap();
        assert_eq!(current.meta.last_log_id, Some(log_id(7)));
        let (applied, _) = sm.applied_state().await.unwrap();
        assert_eq!(applied, Some(log_id(7)));
        assert_eq!(sm.engine().document_count(), 3);
    }
}

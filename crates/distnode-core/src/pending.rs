//! Registry of in-flight downloads, keyed by object id.
//!
//! The registry is the single source of truth for "is X already being fetched".
//! Each entry carries a shared completion future; whoever creates the entry gets
//! the matching [`CompletionHandle`] and must settle it exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::body::SharedBody;
use crate::error::DownloadError;
use crate::object::ObjectId;

/// Outcome shared by every caller of one download.
pub type DownloadOutcome = Result<Arc<SharedBody>, DownloadError>;

/// Cloneable future resolving when a source is found (or every source failed).
pub type Completion = Shared<BoxFuture<'static, DownloadOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LookingForSource,
    Downloading,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::LookingForSource => "looking_for_source",
            Phase::Downloading => "downloading",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "looking_for_source" => Some(Phase::LookingForSource),
            "downloading" => Some(Phase::Downloading),
            _ => None,
        }
    }
}

/// One in-flight download.
pub struct PendingDownload {
    object_id: ObjectId,
    size: u64,
    start_offset: u64,
    phase: Mutex<Phase>,
    completion: Completion,
}

impl std::fmt::Debug for PendingDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDownload")
            .field("object_id", &self.object_id)
            .field("size", &self.size)
            .field("start_offset", &self.start_offset)
            .field("phase", &self.phase())
            .finish()
    }
}

impl PendingDownload {
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// The shared completion future; every clone resolves to the same outcome.
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn record(&self) -> PendingRecord {
        PendingRecord {
            object_id: self.object_id.clone(),
            size: self.size,
            phase: self.phase(),
            start_offset: self.start_offset,
        }
    }
}

/// Write side of a [`Completion`]. Dropping it unresolved rejects with `Aborted`.
#[derive(Debug)]
pub struct CompletionHandle {
    tx: oneshot::Sender<DownloadOutcome>,
}

impl CompletionHandle {
    pub fn resolve(self, body: Arc<SharedBody>) {
        let _ = self.tx.send(Ok(body));
    }

    pub fn reject(self, err: DownloadError) {
        let _ = self.tx.send(Err(err));
    }
}

pub enum Begin {
    /// A new entry was created; the caller must drive it to completion.
    Started(Arc<PendingDownload>, CompletionHandle),
    /// Another flow already owns this object.
    InProgress(Arc<PendingDownload>),
}

/// Persisted view of a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub object_id: ObjectId,
    pub size: u64,
    pub phase: Phase,
    pub start_offset: u64,
}

#[derive(Debug, Default)]
pub struct PendingDownloads {
    entries: Mutex<HashMap<ObjectId, Arc<PendingDownload>>>,
}

impl PendingDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ObjectId, Arc<PendingDownload>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic check-and-create for a download starting at byte 0.
    pub fn try_begin(&self, object_id: ObjectId, size: u64) -> Begin {
        self.try_begin_from(object_id, size, 0)
    }

    /// Like [`try_begin`](Self::try_begin), for a download resuming at `start_offset`.
    pub fn try_begin_from(&self, object_id: ObjectId, size: u64, start_offset: u64) -> Begin {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(&object_id) {
            return Begin::InProgress(Arc::clone(existing));
        }
        let (tx, rx) = oneshot::channel::<DownloadOutcome>();
        let completion = rx
            .map(|received| received.unwrap_or(Err(DownloadError::Aborted)))
            .boxed()
            .shared();
        let pending = Arc::new(PendingDownload {
            object_id: object_id.clone(),
            size,
            start_offset,
            phase: Mutex::new(Phase::LookingForSource),
            completion,
        });
        entries.insert(object_id, Arc::clone(&pending));
        Begin::Started(pending, CompletionHandle { tx })
    }

    pub fn get(&self, object_id: &ObjectId) -> Option<Arc<PendingDownload>> {
        self.entries().get(object_id).cloned()
    }

    /// Remove the entry; returns false if it was already gone.
    pub fn end(&self, object_id: &ObjectId) -> bool {
        self.entries().remove(object_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.entries().len()
    }

    pub fn snapshot(&self) -> Vec<PendingRecord> {
        let mut records: Vec<PendingRecord> =
            self.entries().values().map(|p| p.record()).collect();
        records.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(begin: Begin) -> (Arc<PendingDownload>, CompletionHandle) {
        match begin {
            Begin::Started(p, h) => (p, h),
            Begin::InProgress(_) => panic!("expected a new entry"),
        }
    }

    #[tokio::test]
    async fn second_begin_attaches_to_first() {
        let registry = PendingDownloads::new();
        let (first, handle) = started(registry.try_begin(ObjectId::from("obj-1"), 10));
        let second = match registry.try_begin(ObjectId::from("obj-1"), 10) {
            Begin::InProgress(p) => p,
            Begin::Started(..) => panic!("expected in-progress"),
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count(), 1);

        let body = Arc::new(SharedBody::new(
            ObjectId::from("obj-1"),
            0,
            Arc::new(crate::testing::MemoryStore::new()),
            crate::body::DEFAULT_REPLAY_WINDOW_BYTES,
        ));
        handle.resolve(Arc::clone(&body));
        let a = first.completion().await.unwrap();
        let b = second.completion().await.unwrap();
        assert!(Arc::ptr_eq(&a, &body));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn dropped_handle_rejects_with_aborted() {
        let registry = PendingDownloads::new();
        let (pending, handle) = started(registry.try_begin(ObjectId::from("x"), 1));
        drop(handle);
        assert_eq!(pending.completion().await.unwrap_err(), DownloadError::Aborted);
    }

    #[test]
    fn end_is_idempotent_and_frees_the_id() {
        let registry = PendingDownloads::new();
        let _ = started(registry.try_begin(ObjectId::from("x"), 1));
        assert!(registry.end(&ObjectId::from("x")));
        assert!(!registry.end(&ObjectId::from("x")));
        assert_eq!(registry.count(), 0);
        assert!(registry.get(&ObjectId::from("x")).is_none());
        let _ = started(registry.try_begin(ObjectId::from("x"), 1));
    }

    #[test]
    fn snapshot_reports_phase_and_offset() {
        let registry = PendingDownloads::new();
        let (b, _hb) = started(registry.try_begin_from(ObjectId::from("b"), 20, 5));
        let (_a, _ha) = started(registry.try_begin(ObjectId::from("a"), 10));
        assert_eq!(b.phase(), Phase::LookingForSource);
        b.set_phase(Phase::Downloading);
        assert_eq!(
            registry.snapshot(),
            vec![
                PendingRecord {
                    object_id: ObjectId::from("a"),
                    size: 10,
                    phase: Phase::LookingForSource,
                    start_offset: 0,
                },
                PendingRecord {
                    object_id: ObjectId::from("b"),
                    size: 20,
                    phase: Phase::Downloading,
                    start_offset: 5,
                },
            ]
        );
    }

    #[test]
    fn phase_strings() {
        for phase in [Phase::LookingForSource, Phase::Downloading] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("done"), None);
    }
}

//! Fan-out between one upstream transfer and any number of callers.
//!
//! The orchestrator pushes chunks as they arrive. Each subscriber gets its own
//! stream over the whole object, starting at byte 0. Only a bounded tail of
//! recent chunks is kept in memory; a subscriber behind that tail reads the
//! bytes already persisted to the object store (the partial copy while the
//! transfer runs, the committed copy after). A resumed transfer serves its
//! first `start_offset` bytes the same way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;

use crate::error::DownloadError;
use crate::object::{ObjectId, ObjectStream};
use crate::storage::DynObjectStore;

pub const DEFAULT_REPLAY_WINDOW_BYTES: usize = 4 * 1024 * 1024;

/// Largest single read a subscriber makes against the store.
const STORE_READ_BYTES: u64 = 256 * 1024;

#[derive(Debug)]
struct BodyState {
    /// Recent chunks with their absolute offsets, oldest first.
    window: VecDeque<(u64, Bytes)>,
    window_bytes: usize,
    /// Absolute end of the bytes pushed so far.
    received: u64,
    /// Absolute end of the prefix readable from the store.
    persisted: u64,
    store_readable: bool,
    outcome: Option<Result<(), DownloadError>>,
}

impl BodyState {
    fn window_chunk(&self, pos: u64) -> Option<Bytes> {
        let idx = self.window.partition_point(|(offset, _)| *offset <= pos);
        let (offset, chunk) = self.window.get(idx.checked_sub(1)?)?;
        let skip = (pos - offset) as usize;
        (skip < chunk.len()).then(|| chunk.slice(skip..))
    }
}

enum Step {
    Chunk(Bytes),
    ReadStore(usize),
    Wait,
    End,
    Failed(DownloadError),
}

/// Body of one in-flight object transfer, shared by every attached caller.
pub struct SharedBody {
    object_id: ObjectId,
    start_offset: u64,
    window_limit: usize,
    store: DynObjectStore,
    state: Mutex<BodyState>,
    progress: watch::Sender<u64>,
}

impl std::fmt::Debug for SharedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBody")
            .field("object_id", &self.object_id)
            .field("start_offset", &self.start_offset)
            .field("window_limit", &self.window_limit)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl SharedBody {
    /// `start_offset` > 0 marks a resumed transfer whose first bytes are
    /// already in the store's partial copy.
    pub fn new(
        object_id: ObjectId,
        start_offset: u64,
        store: DynObjectStore,
        window_limit: usize,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            object_id,
            start_offset,
            window_limit,
            store,
            state: Mutex::new(BodyState {
                window: VecDeque::new(),
                window_bytes: 0,
                received: start_offset,
                persisted: start_offset,
                store_readable: true,
                outcome: None,
            }),
            progress,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Bytes received so far, excluding the resume offset.
    pub fn received(&self) -> u64 {
        self.state().received - self.start_offset
    }

    /// Bytes currently held in memory.
    pub fn retained_bytes(&self) -> usize {
        self.state().window_bytes
    }

    pub fn is_terminal(&self) -> bool {
        self.state().outcome.is_some()
    }

    fn state(&self) -> MutexGuard<'_, BodyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.progress.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Append the next chunk. `persisted` says whether it is already in the store.
    pub fn push(&self, chunk: Bytes, persisted: bool) {
        {
            let mut state = self.state();
            if state.outcome.is_some() {
                return;
            }
            let offset = state.received;
            state.received += chunk.len() as u64;
            if persisted && state.store_readable {
                state.persisted = state.received;
            }
            state.window_bytes += chunk.len();
            state.window.push_back((offset, chunk));
            while state.window_bytes > self.window_limit {
                match state.window.pop_front() {
                    Some((_, old)) => state.window_bytes -= old.len(),
                    None => break,
                }
            }
        }
        self.notify();
    }

    /// The store no longer holds this object's bytes; only the in-memory
    /// tail can be served from now on.
    pub fn abandon_store(&self) {
        self.state().store_readable = false;
        self.notify();
    }

    pub fn finish(&self) {
        self.settle(Ok(()));
    }

    pub fn fail(&self, err: DownloadError) {
        self.settle(Err(err));
    }

    fn settle(&self, outcome: Result<(), DownloadError>) {
        {
            let mut state = self.state();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome);
        }
        self.notify();
    }

    fn step(&self, pos: u64) -> Step {
        let state = self.state();
        if let Some(chunk) = state.window_chunk(pos) {
            return Step::Chunk(chunk);
        }
        if let Some(Err(err)) = &state.outcome {
            return Step::Failed(err.clone());
        }
        if pos < state.persisted && state.store_readable {
            return Step::ReadStore((state.persisted - pos).min(STORE_READ_BYTES) as usize);
        }
        if pos >= state.received {
            return match state.outcome {
                Some(_) => Step::End,
                None => Step::Wait,
            };
        }
        Step::Failed(DownloadError::StreamInterrupted(format!(
            "reader at byte {pos} fell behind a transfer that is not being cached"
        )))
    }

    /// Wait for the transfer to end and return its outcome.
    pub async fn finished(&self) -> Result<(), DownloadError> {
        let mut rx = self.progress.subscribe();
        loop {
            rx.borrow_and_update();
            if let Some(outcome) = self.state().outcome.clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(DownloadError::Aborted);
            }
        }
    }

    /// A new stream over the whole object from byte 0: stored bytes and the
    /// in-memory tail first, then live chunks.
    pub fn subscribe(self: &Arc<Self>) -> ObjectStream {
        let rx = self.progress.subscribe();
        let body = Arc::clone(self);
        futures::stream::unfold(Some((body, 0u64, rx)), |cursor| async move {
            let (body, pos, mut rx) = cursor?;
            loop {
                rx.borrow_and_update();
                match body.step(pos) {
                    Step::Chunk(chunk) => {
                        let next = pos + chunk.len() as u64;
                        return Some((Ok(chunk), Some((body, next, rx))));
                    }
                    Step::ReadStore(len) => {
                        let read = body.store.read_range(&body.object_id, pos, len).await;
                        return match read {
                            Ok(chunk) if !chunk.is_empty() => {
                                let next = pos + chunk.len() as u64;
                                Some((Ok(chunk), Some((body, next, rx))))
                            }
                            Ok(_) => Some((
                                Err(DownloadError::Storage(format!(
                                    "stored copy of {} ends before byte {pos}",
                                    body.object_id
                                ))),
                                None,
                            )),
                            Err(err) => Some((Err(DownloadError::Storage(format!("{err:#}"))), None)),
                        };
                    }
                    Step::End => return None,
                    Step::Failed(err) => return Some((Err(err), None)),
                    Step::Wait => {
                        if rx.changed().await.is_err() {
                            return Some((Err(DownloadError::Aborted), None));
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

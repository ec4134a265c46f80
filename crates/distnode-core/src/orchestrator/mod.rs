//! Probe-then-fetch download orchestration.
//!
//! One orchestration per object: wait for a global download slot, probe the
//! candidates (fastest first) for availability with bounded fan-out, fetch from
//! the first that confirms, and stream the body into the store and to every
//! attached caller. The slot is held until the stream terminates.

mod pump;
mod select;
mod slots;


pub use slots::{DownloadSlot, DownloadSlots};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::body::{SharedBody, DEFAULT_REPLAY_WINDOW_BYTES};
use crate::config::LimitsConfig;
use crate::endpoint::Endpoint;
use crate::error::DownloadError;
use crate::health::HealthTracker;
use crate::object::ObjectId;
use crate::pending::{CompletionHandle, PendingDownload, PendingDownloads};
use crate::storage::DynObjectStore;
use crate::transport::DynTransport;

pub const MAX_CONCURRENT_AVAILABILITY_CHECKS_PER_DOWNLOAD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorLimits {
    pub max_concurrent_downloads: usize,
    pub availability_checks_per_download: usize,
    pub replay_window_bytes: usize,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 50,
            availability_checks_per_download: MAX_CONCURRENT_AVAILABILITY_CHECKS_PER_DOWNLOAD,
            replay_window_bytes: DEFAULT_REPLAY_WINDOW_BYTES,
        }
    }
}

impl From<&LimitsConfig> for OrchestratorLimits {
    fn from(cfg: &LimitsConfig) -> Self {
        Self {
            max_concurrent_downloads: cfg.max_concurrent_downloads,
            availability_checks_per_download: cfg.availability_checks_per_download,
            replay_window_bytes: cfg.replay_window_bytes,
        }
    }
}

/// Everything one orchestration needs; fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub object_id: ObjectId,
    pub size: u64,
    /// Ascending by mean response time.
    pub candidates: Vec<Endpoint>,
    pub start_offset: u64,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: DynTransport,
    health: Arc<HealthTracker>,
    registry: Arc<PendingDownloads>,
    store: DynObjectStore,
    slots: DownloadSlots,
    availability_checks: usize,
    replay_window_bytes: usize,
}

impl Orchestrator {
    pub fn new(
        transport: DynTransport,
        health: Arc<HealthTracker>,
        registry: Arc<PendingDownloads>,
        store: DynObjectStore,
        limits: OrchestratorLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                health,
                registry,
                store,
                slots: DownloadSlots::new(limits.max_concurrent_downloads),
                availability_checks: limits.availability_checks_per_download.max(1),
                replay_window_bytes: limits.replay_window_bytes,
            }),
        }
    }

    pub fn slots(&self) -> &DownloadSlots {
        &self.inner.slots
    }

    /// Build a request with candidates ordered by the current health snapshot.
    pub fn prepare(
        &self,
        object_id: ObjectId,
        size: u64,
        mut candidates: Vec<Endpoint>,
        start_offset: u64,
    ) -> DownloadRequest {
        self.inner.health.sort_by_response_time(&mut candidates);
        DownloadRequest {
            object_id,
            size,
            candidates,
            start_offset,
        }
    }

    /// Run the orchestration in the background. `completion` is settled exactly
    /// once: with the shared body when a source is found, or with the error.
    pub fn start(
        &self,
        request: DownloadRequest,
        pending: Arc<PendingDownload>,
        completion: CompletionHandle,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(request, pending, completion).await })
    }

    async fn run(
        self,
        request: DownloadRequest,
        pending: Arc<PendingDownload>,
        completion: CompletionHandle,
    ) {
        let object_id = request.object_id.clone();
        if request.candidates.is_empty() {
            warn!(object_id = %object_id, "no storage endpoints available to download the data object from");
            self.fail(&object_id, completion, DownloadError::NoEndpointsAvailable)
                .await;
            return;
        }

        let _slot = match self.inner.slots.acquire().await {
            Ok(slot) => slot,
            Err(err) => {
                self.fail(&object_id, completion, err).await;
                return;
            }
        };
        info!(
            object_id = %object_id,
            size = request.size,
            start_offset = request.start_offset,
            candidates = request.candidates.len(),
            "downloading data object"
        );

        let found = select::find_source(
            &self.inner.transport,
            &request,
            &pending,
            self.inner.availability_checks,
        )
        .await;
        let (endpoint, upstream) = match found {
            Ok(found) => found,
            Err(err) => {
                error!(object_id = %object_id, error = %err, "could not download data object");
                self.fail(&object_id, completion, err).await;
                return;
            }
        };
        info!(
            object_id = %object_id,
            endpoint = %endpoint,
            bucket_id = endpoint.bucket_id(),
            "download source chosen"
        );

        let body = Arc::new(SharedBody::new(
            object_id.clone(),
            request.start_offset,
            Arc::clone(&self.inner.store),
            self.inner.replay_window_bytes,
        ));
        completion.resolve(Arc::clone(&body));

        match pump::drain(self.inner.store.as_ref(), &body, upstream, request.size).await {
            Ok(received) => info!(object_id = %object_id, received, "data object downloaded"),
            Err(err) => warn!(object_id = %object_id, error = %err, "data object stream ended early"),
        }
        self.inner.registry.end(&object_id);
    }

    async fn fail(&self, object_id: &ObjectId, completion: CompletionHandle, err: DownloadError) {
        pump::discard(self.inner.store.as_ref(), object_id).await;
        self.inner.registry.end(object_id);
        completion.reject(err);
    }
}

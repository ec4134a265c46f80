//! Content coordinator: the node's "get me object X" entry point.
//!
//! Serves cache hits straight from the store, attaches callers to a download
//! already in flight, and otherwise resolves candidates through the directory
//! and hands the object to the orchestrator. Startup reconciliation and cache
//! maintenance live in `maintenance`.

mod maintenance;


use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::config::LimitsConfig;
use crate::directory::DynDirectory;
use crate::endpoint;
use crate::error::DownloadError;
use crate::health::HealthTracker;
use crate::logging::LogThrottle;
use crate::object::{ObjectId, ObjectStream};
use crate::orchestrator::{Orchestrator, OrchestratorLimits};
use crate::pending::{Begin, PendingDownload, PendingDownloads, PendingRecord};
use crate::state_db::DynStateStore;
use crate::storage::DynObjectStore;
use crate::transport::DynTransport;

/// Where a response's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    /// Committed local copy.
    Cache,
    /// This request started the download.
    Fresh,
    /// Joined a download started by someone else.
    Attached,
}

pub struct ObjectResponse {
    pub origin: ResponseOrigin,
    pub size: u64,
    pub stream: ObjectStream,
}

impl std::fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectResponse")
            .field("origin", &self.origin)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// External services the coordinator is wired to.
pub struct Collaborators {
    pub directory: DynDirectory,
    pub transport: DynTransport,
    pub store: DynObjectStore,
    pub state: DynStateStore,
}

pub struct ContentCoordinator {
    directory: DynDirectory,
    store: DynObjectStore,
    state: DynStateStore,
    registry: Arc<PendingDownloads>,
    health: Arc<HealthTracker>,
    orchestrator: Orchestrator,
    throttle: LogThrottle,
    /// Persisted pending records this process has not taken over; written
    /// back on every save so a restart can still resume them.
    carried: Mutex<Vec<PendingRecord>>,
}

impl ContentCoordinator {
    pub fn new(collaborators: Collaborators, limits: &LimitsConfig) -> Self {
        let Collaborators {
            directory,
            transport,
            store,
            state,
        } = collaborators;
        let registry = Arc::new(PendingDownloads::new());
        let health = Arc::new(HealthTracker::new(
            Arc::clone(&transport),
            limits.response_time_checks,
        ));
        let orchestrator = Orchestrator::new(
            transport,
            Arc::clone(&health),
            Arc::clone(&registry),
            Arc::clone(&store),
            OrchestratorLimits::from(limits),
        );
        Self {
            directory,
            store,
            state,
            registry,
            health,
            orchestrator,
            throttle: LogThrottle::default(),
            carried: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PendingDownloads> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn pending_count(&self) -> usize {
        self.registry.count()
    }

    /// Resolve a caller's request for `object_id` to a byte stream.
    pub async fn request_object(&self, object_id: &ObjectId) -> Result<ObjectResponse, DownloadError> {
        if let Some(response) = self.from_cache(object_id).await? {
            return Ok(response);
        }
        if let Some(pending) = self.registry.get(object_id) {
            debug!(object_id = %object_id, "attaching to pending download");
            return self.attach(pending).await;
        }

        let info = self
            .directory
            .resolve_candidates(object_id)
            .await
            .map_err(|e| DownloadError::Directory(format!("{e:#}")))?;
        let data = match info.data {
            Some(data) if info.exists => data,
            _ => return Err(DownloadError::ObjectNotFound(object_id.clone())),
        };
        if !info.supported {
            return Err(DownloadError::NotDistributed(object_id.clone()));
        }

        // A download may have committed while the directory answered.
        if let Some(response) = self.from_cache(object_id).await? {
            return Ok(response);
        }

        match self.registry.try_begin(object_id.clone(), data.size) {
            Begin::InProgress(pending) => self.attach(pending).await,
            Begin::Started(pending, completion) => {
                self.take_carried(object_id);
                let candidates = endpoint::filter_valid(data.endpoints, &self.throttle);
                let request =
                    self.orchestrator
                        .prepare(object_id.clone(), data.size, candidates, 0);
                self.orchestrator
                    .start(request, Arc::clone(&pending), completion);
                let body = pending.completion().await?;
                Ok(ObjectResponse {
                    origin: ResponseOrigin::Fresh,
                    size: data.size,
                    stream: body.subscribe(),
                })
            }
        }
    }

    fn carried(&self) -> MutexGuard<'_, Vec<PendingRecord>> {
        self.carried.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_carried(&self, object_id: &ObjectId) {
        self.carried().retain(|r| &r.object_id != object_id);
    }

    async fn from_cache(&self, object_id: &ObjectId) -> Result<Option<ObjectResponse>, DownloadError> {
        if !self.store.contains(object_id).await {
            return Ok(None);
        }
        let (size, stream) = self
            .store
            .open(object_id)
            .await
            .map_err(|e| DownloadError::Storage(format!("{e:#}")))?;
        debug!(object_id = %object_id, size, "serving data object from cache");
        Ok(Some(ObjectResponse {
            origin: ResponseOrigin::Cache,
            size,
            stream,
        }))
    }

    /// Join an in-flight download. The stream starts at byte 0 even when the
    /// download resumed from an offset; earlier bytes come from the store.
    async fn attach(&self, pending: Arc<PendingDownload>) -> Result<ObjectResponse, DownloadError> {
        let body = pending.completion().await?;
        Ok(ObjectResponse {
            origin: ResponseOrigin::Attached,
            size: pending.size(),
            stream: body.subscribe(),
        })
    }
}

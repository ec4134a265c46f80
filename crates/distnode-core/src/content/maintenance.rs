//! Startup reconciliation, periodic cache maintenance and shutdown drain.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::ContentCoordinator;
use crate::endpoint;
use crate::object::ObjectId;
use crate::pending::{Begin, PendingRecord};
use crate::state_db::StateSnapshot;

impl ContentCoordinator {
    /// Bring the local cache in line with persisted state and the directory:
    /// drop unsupported objects and orphaned partials, resume persisted
    /// downloads, then run one latency probe cycle.
    pub async fn startup_init(&self) -> Result<()> {
        let snapshot = self.state.load().await.context("load persisted state")?;
        self.health.restore(snapshot.response_times);
        *self.carried() = snapshot.pending.clone();

        let supported = self
            .directory
            .supported_objects()
            .await
            .context("fetch supported data objects")?;

        let mut removed = 0usize;
        for object_id in self.store.list_objects().await? {
            if !supported.contains_key(&object_id) {
                self.store
                    .remove(&object_id)
                    .await
                    .with_context(|| format!("remove unsupported object {object_id}"))?;
                removed += 1;
            }
        }

        let records: HashMap<ObjectId, PendingRecord> = snapshot
            .pending
            .into_iter()
            .map(|r| (r.object_id.clone(), r))
            .collect();
        let mut resumed = 0usize;
        for object_id in self.store.list_partial().await? {
            let record = records
                .get(&object_id)
                .filter(|_| supported.contains_key(&object_id));
            let outcome = match record {
                Some(record) => self.resume(record).await,
                None => Ok(false),
            };
            match outcome {
                Ok(true) => resumed += 1,
                Ok(false) => {
                    debug!(object_id = %object_id, "discarding partial data object");
                    self.store.discard(&object_id).await?;
                }
                Err(err) => {
                    warn!(object_id = %object_id, error = %format!("{err:#}"), "could not resume download");
                    self.store.discard(&object_id).await?;
                }
            }
        }

        // Every persisted record is now either running again or gone with its partial.
        self.carried().clear();
        info!(
            supported = supported.len(),
            removed,
            resumed,
            "cache initialized"
        );
        self.check_response_times().await;
        Ok(())
    }

    /// Ok(false) means there is nothing worth resuming.
    async fn resume(&self, record: &PendingRecord) -> Result<bool> {
        let object_id = &record.object_id;
        let Some(offset) = self.store.partial_len(object_id).await else {
            return Ok(false);
        };
        let info = self.directory.resolve_candidates(object_id).await?;
        if !info.exists || !info.supported {
            return Ok(false);
        }
        let Some(data) = info.data else {
            return Ok(false);
        };
        if offset > data.size {
            return Ok(false);
        }
        if offset == data.size {
            self.store.commit(object_id).await?;
            info!(object_id = %object_id, "partial data object was already complete");
            return Ok(true);
        }

        match self
            .registry
            .try_begin_from(object_id.clone(), data.size, offset)
        {
            Begin::InProgress(_) => Ok(true),
            Begin::Started(pending, completion) => {
                let candidates = endpoint::filter_valid(data.endpoints, &self.throttle);
                let request =
                    self.orchestrator
                        .prepare(object_id.clone(), data.size, candidates, offset);
                info!(object_id = %object_id, offset, size = data.size, "resuming download");
                self.orchestrator.start(request, pending, completion);
                Ok(true)
            }
        }
    }

    /// Remove stored objects the directory no longer assigns to this node.
    /// Returns how many were removed.
    pub async fn cache_cleanup(&self) -> usize {
        let supported = match self.directory.supported_objects().await {
            Ok(supported) => supported,
            Err(err) => {
                error!(error = %format!("{err:#}"), "cache cleanup skipped: directory unavailable");
                return 0;
            }
        };
        let local = match self.store.list_objects().await {
            Ok(local) => local,
            Err(err) => {
                error!(error = %format!("{err:#}"), "cache cleanup skipped: cannot list objects");
                return 0;
            }
        };

        let mut removed = 0;
        for object_id in local {
            if supported.contains_key(&object_id) || self.registry.get(&object_id).is_some() {
                continue;
            }
            match self.store.remove(&object_id).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(object_id = %object_id, error = %format!("{err:#}"), "failed to remove data object")
                }
            }
        }
        info!(removed, "cache cleanup finished");
        removed
    }

    /// Load persisted state without reconciling the store: response-time
    /// samples are restored and pending records are carried into every later
    /// save. For short-lived processes that must not lose what a node left.
    pub async fn restore_state(&self) -> Result<()> {
        let snapshot = self.state.load().await.context("load persisted state")?;
        self.health.restore(snapshot.response_times);
        *self.carried() = snapshot.pending;
        Ok(())
    }

    /// Running downloads plus carried records for objects not running here.
    pub fn state_snapshot(&self) -> StateSnapshot {
        let mut pending = self.registry.snapshot();
        pending.extend(
            self.carried()
                .iter()
                .filter(|r| self.registry.get(&r.object_id).is_none())
                .cloned(),
        );
        pending.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        StateSnapshot {
            pending,
            response_times: self.health.snapshot(),
        }
    }

    pub async fn save_state(&self) -> Result<()> {
        self.state
            .save(&self.state_snapshot())
            .await
            .context("save node state")
    }

    pub async fn check_response_times(&self) {
        self.health
            .check_active_endpoints(self.directory.as_ref())
            .await;
    }

    /// Give in-flight downloads up to `max_attempts` waits of `delay`, saving
    /// state before each. Returns the number still pending at the end.
    pub async fn drain(&self, max_attempts: u32, delay: Duration) -> usize {
        let mut attempt = 0;
        loop {
            if let Err(err) = self.save_state().await {
                error!(error = %format!("{err:#}"), "failed to save state during shutdown");
            }
            let pending = self.registry.count();
            if pending == 0 {
                info!("no pending downloads");
                return 0;
            }
            if attempt >= max_attempts {
                warn!(pending, "exiting with downloads still pending, they will resume on restart");
                return pending;
            }
            attempt += 1;
            info!(pending, attempt, max_attempts, "waiting for pending downloads to finish");
            tokio::time::sleep(delay).await;
        }
    }
}

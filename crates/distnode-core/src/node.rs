//! Node assembly from configuration, and the periodic maintenance tasks.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::{DistnodeConfig, IntervalsConfig, ShutdownConfig};
use crate::content::{Collaborators, ContentCoordinator};
use crate::directory::FileDirectory;
use crate::state_db::StateDb;
use crate::storage::FsObjectStore;
use crate::transport::CurlTransport;

/// Object directory from config, or the XDG default.
pub fn assets_dir(cfg: &DistnodeConfig) -> Result<PathBuf> {
    match &cfg.directories.assets {
        Some(dir) => Ok(dir.clone()),
        None => FsObjectStore::default_dir(),
    }
}

/// State database path from config, or the XDG default.
pub fn state_db_path(cfg: &DistnodeConfig) -> Result<PathBuf> {
    match &cfg.directories.state {
        Some(dir) => Ok(dir.join("state.db")),
        None => StateDb::default_path(),
    }
}

pub struct Node {
    coordinator: Arc<ContentCoordinator>,
    intervals: IntervalsConfig,
    shutdown: ShutdownConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Wire the curl transport, catalog directory, filesystem store and state
    /// database described by `cfg`.
    pub async fn from_config(cfg: &DistnodeConfig) -> Result<Self> {
        let store = FsObjectStore::open(assets_dir(cfg)?)?;
        let state = StateDb::open_at(state_db_path(cfg)?)
            .await
            .context("open state database")?;
        let directory = FileDirectory::new(
            cfg.directory.catalog_path.clone(),
            cfg.worker_id,
            cfg.bucket_selection(),
        );
        let transport = CurlTransport::new(cfg.limits.outbound_request_timeout());

        let coordinator = ContentCoordinator::new(
            Collaborators {
                directory: Arc::new(directory),
                transport: Arc::new(transport),
                store: Arc::new(store),
                state: Arc::new(state),
            },
            &cfg.limits,
        );
        Ok(Self::new(coordinator, cfg.intervals.clone(), cfg.shutdown.clone()))
    }

    pub fn new(
        coordinator: ContentCoordinator,
        intervals: IntervalsConfig,
        shutdown: ShutdownConfig,
    ) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            intervals,
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<ContentCoordinator> {
        &self.coordinator
    }

    /// Reconcile the cache, then start the save-state, response-time and
    /// cleanup intervals.
    pub async fn start(&mut self) -> Result<()> {
        self.coordinator.startup_init().await?;

        self.tasks.push(every(
            secs(self.intervals.save_state_secs),
            Arc::clone(&self.coordinator),
            |c| async move {
                if let Err(err) = c.save_state().await {
                    error!(error = %format!("{err:#}"), "periodic state save failed");
                }
            },
        ));
        self.tasks.push(every(
            secs(self.intervals.check_response_times_secs),
            Arc::clone(&self.coordinator),
            |c| async move { c.check_response_times().await },
        ));
        self.tasks.push(every(
            secs(self.intervals.cache_cleanup_secs),
            Arc::clone(&self.coordinator),
            |c| async move {
                c.cache_cleanup().await;
            },
        ));
        info!(pending = self.coordinator.pending_count(), "node started");
        Ok(())
    }

    /// Stop the intervals and wait out in-flight downloads. Returns how many
    /// were still pending (and persisted for resumption).
    pub async fn shutdown(mut self) -> usize {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coordinator
            .drain(self.shutdown.max_attempts, self.shutdown.retry_delay())
            .await
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s.max(1))
}

/// Run `f` every `period`, first after one full period.
fn every<F, Fut>(period: Duration, coordinator: Arc<ContentCoordinator>, f: F) -> JoinHandle<()>
where
    F: Fn(Arc<ContentCoordinator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            f(Arc::clone(&coordinator)).await;
        }
    })
}

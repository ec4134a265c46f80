//! Endpoint health: observed response times and the probe cycle that feeds them.
//!
//! Probes issue a version request per endpoint under a fixed concurrency cap.
//! Only successful probes record a sample; failures leave earlier samples alone
//! and produce a rate-limited warning.

mod table;


pub use table::{
    ResponseTimes, ResponseTimesSnapshot, MAX_RESPONSE_TIME_SAMPLES, UNMEASURED_RESPONSE_TIME_MS,
};

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::directory::Directory;
use crate::endpoint::{self, Endpoint};
use crate::logging::LogThrottle;
use crate::transport::DynTransport;

/// Default cap on concurrent latency probes.
pub const MAX_CONCURRENT_RESPONSE_TIME_CHECKS: usize = 10;

pub struct HealthTracker {
    transport: DynTransport,
    max_concurrent_checks: usize,
    times: Mutex<ResponseTimes>,
    throttle: LogThrottle,
}

impl HealthTracker {
    pub fn new(transport: DynTransport, max_concurrent_checks: usize) -> Self {
        Self {
            transport,
            max_concurrent_checks: max_concurrent_checks.max(1),
            times: Mutex::new(ResponseTimes::new()),
            throttle: LogThrottle::default(),
        }
    }

    /// Replace the warning throttle (tests use a zero pause).
    pub fn with_log_throttle(mut self, throttle: LogThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    fn times(&self) -> MutexGuard<'_, ResponseTimes> {
        self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mean_response_time(&self, endpoint: &Endpoint) -> Option<f64> {
        self.times().mean(endpoint.as_str())
    }

    pub fn mean_response_times(&self) -> BTreeMap<String, f64> {
        self.times().means()
    }

    pub fn record(&self, endpoint: &Endpoint, millis: u64) {
        self.times().record(endpoint.as_str(), millis);
    }

    /// Stable ascending sort by mean response time; unmeasured endpoints go last.
    pub fn sort_by_response_time(&self, endpoints: &mut [Endpoint]) {
        let times = self.times();
        endpoints.sort_by(|a, b| {
            times
                .sort_key(a.as_str())
                .total_cmp(&times.sort_key(b.as_str()))
        });
    }

    /// Time one version request against `endpoint`.
    pub async fn check_response_time(&self, endpoint: &Endpoint) {
        let start = Instant::now();
        match self.transport.check_version(endpoint).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                self.record(endpoint, elapsed);
            }
            Err(err) => {
                if self.throttle.allow(endpoint.as_str()) {
                    warn!(
                        endpoint = %endpoint,
                        error = %err,
                        "storage node response time check failed"
                    );
                }
            }
        }
    }

    /// One probe per endpoint, at most `max_concurrent_checks` at a time.
    pub async fn probe_all(&self, endpoints: Vec<Endpoint>) {
        futures::stream::iter(endpoints)
            .for_each_concurrent(self.max_concurrent_checks, |endpoint| async move {
                self.check_response_time(&endpoint).await;
            })
            .await;
        debug!(response_times = ?self.mean_response_times(), "response time check cycle finished");
    }

    /// Probe every active storage endpoint the directory knows about.
    /// A directory failure skips the cycle.
    pub async fn check_active_endpoints(&self, directory: &dyn Directory) {
        let raw = match directory.active_storage_endpoints().await {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %format!("{err:#}"), "could not check storage node endpoint response times");
                return;
            }
        };
        let endpoints = endpoint::filter_valid(raw, &self.throttle);
        self.probe_all(endpoints).await;
    }

    pub fn snapshot(&self) -> ResponseTimesSnapshot {
        self.times().to_snapshot()
    }

    pub fn restore(&self, snapshot: ResponseTimesSnapshot) {
        *self.times() = ResponseTimes::from_snapshot(snapshot);
    }
}

//! Persistent node state (SQLite via sqlx).
//!
//! Holds what must survive a restart: the pending-download registry (so
//! transfers can resume from their partial files) and the response-time table.

mod db;
mod records;


pub use db::StateDb;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::health::ResponseTimesSnapshot;
use crate::pending::PendingRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub pending: Vec<PendingRecord>,
    pub response_times: ResponseTimesSnapshot,
}

pub type DynStateStore = Arc<dyn StateStore>;

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Replace the persisted state with `snapshot`.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Last saved state; empty if nothing was saved yet.
    async fn load(&self) -> Result<StateSnapshot>;
}

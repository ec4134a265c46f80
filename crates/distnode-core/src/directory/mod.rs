//! Directory adapter: which objects exist, which this node serves, and which
//! storage nodes claim to hold them.
//!
//! The engine only depends on the [`Directory`] trait; [`FileDirectory`] reads a
//! JSON catalog snapshot from disk.

mod catalog;

pub use catalog::{Catalog, FileDirectory};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::RawEndpoint;
use crate::object::ObjectId;

/// Directory answer for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub exists: bool,
    /// True if this node is responsible for distributing the object.
    pub supported: bool,
    pub data: Option<ObjectData>,
}

impl ObjectInfo {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            supported: false,
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub object_id: ObjectId,
    pub size: u64,
    pub content_hash: String,
    /// Unvalidated storage endpoints of the buckets holding the object's bag.
    pub endpoints: Vec<RawEndpoint>,
}

/// Size and hash of an object this node is expected to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub size: u64,
    pub content_hash: String,
}

pub type DynDirectory = Arc<dyn Directory>;

#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn resolve_candidates(&self, object_id: &ObjectId) -> anyhow::Result<ObjectInfo>;

    /// Endpoints of every storage bucket with an active operator.
    async fn active_storage_endpoints(&self) -> anyhow::Result<Vec<RawEndpoint>>;

    /// Every object this node should hold.
    async fn supported_objects(&self) -> anyhow::Result<HashMap<ObjectId, ObjectSummary>>;
}

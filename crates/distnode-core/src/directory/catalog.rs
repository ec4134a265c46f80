//! JSON catalog snapshot and the file-backed [`Directory`].
//!
//! Layout: storage buckets (operator status + node endpoint), distribution
//! buckets (operators by worker id), and bags linking both to their objects.
//! The file is re-read on every call so an external sync job can replace it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Directory, ObjectData, ObjectInfo, ObjectSummary};
use crate::config::BucketSelection;
use crate::endpoint::RawEndpoint;
use crate::object::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorStatus {
    Active,
    Invited,
    #[serde(rename = "none")]
    Unset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageBucket {
    pub id: String,
    pub operator_status: OperatorStatus,
    #[serde(default)]
    pub node_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionOperator {
    pub worker_id: u64,
    pub status: OperatorStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionBucket {
    pub id: String,
    #[serde(default)]
    pub operators: Vec<DistributionOperator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogObject {
    pub id: ObjectId,
    pub size: u64,
    #[serde(default)]
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bag {
    pub id: String,
    #[serde(default)]
    pub storage_buckets: Vec<String>,
    #[serde(default)]
    pub distribution_buckets: Vec<String>,
    #[serde(default)]
    pub objects: Vec<CatalogObject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub storage_buckets: Vec<StorageBucket>,
    #[serde(default)]
    pub distribution_buckets: Vec<DistributionBucket>,
    #[serde(default)]
    pub bags: Vec<Bag>,
}

impl Catalog {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("parse directory catalog")
    }

    fn bag_of(&self, object_id: &ObjectId) -> Option<(&Bag, &CatalogObject)> {
        self.bags.iter().find_map(|bag| {
            bag.objects
                .iter()
                .find(|o| &o.id == object_id)
                .map(|o| (bag, o))
        })
    }

    /// A bag is served when one of its distribution buckets is selected: by id,
    /// or (for `All`) by having `worker_id` as an active operator.
    pub fn is_bag_served(&self, bag: &Bag, worker_id: u64, selection: &BucketSelection) -> bool {
        match selection {
            BucketSelection::Ids(ids) => bag.distribution_buckets.iter().any(|b| ids.contains(b)),
            BucketSelection::All => bag.distribution_buckets.iter().any(|bucket_id| {
                self.distribution_buckets
                    .iter()
                    .filter(|b| &b.id == bucket_id)
                    .flat_map(|b| &b.operators)
                    .any(|op| op.worker_id == worker_id && op.status == OperatorStatus::Active)
            }),
        }
    }

    /// Storage endpoints of the bag's buckets that have an active operator,
    /// in the bag's bucket order.
    fn storage_endpoints(&self, bag: &Bag) -> Vec<RawEndpoint> {
        bag.storage_buckets
            .iter()
            .filter_map(|id| self.storage_buckets.iter().find(|b| &b.id == id))
            .filter(|b| b.operator_status == OperatorStatus::Active)
            .map(raw_endpoint)
            .collect()
    }

    pub fn object_info(
        &self,
        object_id: &ObjectId,
        worker_id: u64,
        selection: &BucketSelection,
    ) -> ObjectInfo {
        let Some((bag, object)) = self.bag_of(object_id) else {
            return ObjectInfo::not_found();
        };
        ObjectInfo {
            exists: true,
            supported: self.is_bag_served(bag, worker_id, selection),
            data: Some(ObjectData {
                object_id: object.id.clone(),
                size: object.size,
                content_hash: object.content_hash.clone(),
                endpoints: self.storage_endpoints(bag),
            }),
        }
    }

    pub fn active_storage_endpoints(&self) -> Vec<RawEndpoint> {
        self.storage_buckets
            .iter()
            .filter(|b| b.operator_status == OperatorStatus::Active)
            .map(raw_endpoint)
            .collect()
    }

    pub fn supported_objects(
        &self,
        worker_id: u64,
        selection: &BucketSelection,
    ) -> HashMap<ObjectId, ObjectSummary> {
        self.bags
            .iter()
            .filter(|bag| self.is_bag_served(bag, worker_id, selection))
            .flat_map(|bag| &bag.objects)
            .map(|o| {
                (
                    o.id.clone(),
                    ObjectSummary {
                        size: o.size,
                        content_hash: o.content_hash.clone(),
                    },
                )
            })
            .collect()
    }
}

fn raw_endpoint(bucket: &StorageBucket) -> RawEndpoint {
    RawEndpoint {
        bucket_id: bucket.id.clone(),
        node_endpoint: bucket.node_endpoint.clone(),
    }
}

/// [`Directory`] backed by a catalog file on disk.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    path: PathBuf,
    worker_id: u64,
    selection: BucketSelection,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>, worker_id: u64, selection: BucketSelection) -> Self {
        Self {
            path: path.into(),
            worker_id,
            selection,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Catalog> {
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read catalog {}", self.path.display()))?;
        Catalog::from_json(&data)
    }
}

#[async_trait]
impl Directory for FileDirectory {
    async fn resolve_candidates(&self, object_id: &ObjectId) -> Result<ObjectInfo> {
        Ok(self
            .load()
            .await?
            .object_info(object_id, self.worker_id, &self.selection))
    }

    async fn active_storage_endpoints(&self) -> Result<Vec<RawEndpoint>> {
        Ok(self.load().await?.active_storage_endpoints())
    }

    async fn supported_objects(&self) -> Result<HashMap<ObjectId, ObjectSummary>> {
        Ok(self
            .load()
            .await?
            .supported_objects(self.worker_id, &self.selection))
    }
}

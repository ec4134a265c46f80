//! Upstream storage-node transport.
//!
//! Three requests are needed: a version check (latency probe), an availability
//! check for one object, and a ranged fetch returning a live byte stream.

mod curl;
mod parse;

pub use self::curl::CurlTransport;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::object::ObjectId;

/// Body of an accepted fetch. Ends cleanly on EOF; yields `Err` on a mid-transfer failure.
pub type UpstreamBody = BoxStream<'static, Result<Bytes, TransportError>>;

pub type DynTransport = Arc<dyn UpstreamTransport>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Curl(#[from] ::curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("server ignored range request from offset {offset} (HTTP {status})")]
    RangeIgnored { offset: u64, status: u32 },
    #[error("connection closed before response headers")]
    NoResponse,
    #[error("transfer task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync + 'static {
    /// Lightweight request used to time an endpoint.
    async fn check_version(&self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// `Ok(false)` when the node answers that it does not hold the object.
    async fn is_object_available(
        &self,
        endpoint: &Endpoint,
        object_id: &ObjectId,
    ) -> Result<bool, TransportError>;

    /// Start a GET from `offset`. Resolves once response headers are accepted.
    async fn fetch(
        &self,
        endpoint: &Endpoint,
        object_id: &ObjectId,
        offset: u64,
    ) -> Result<UpstreamBody, TransportError>;
}

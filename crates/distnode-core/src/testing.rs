//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio::time::Instant;

use crate::directory::{Directory, ObjectData, ObjectInfo, ObjectSummary};
use crate::endpoint::{Endpoint, RawEndpoint};
use crate::error::DownloadError;
use crate::object::{ObjectId, ObjectStream};
use crate::state_db::{StateSnapshot, StateStore};
use crate::storage::ObjectStore;
use crate::transport::{TransportError, UpstreamBody, UpstreamTransport};

pub(crate) fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub(crate) fn node_root(name: &str) -> String {
    format!("http://{name}.test")
}

/// The API endpoint the fakes key on for node `name`.
pub(crate) fn endpoint(name: &str) -> Endpoint {
    Endpoint::from_node_root(&node_root(name), name).unwrap()
}

pub(crate) async fn read_stream(stream: ObjectStream) -> Result<Vec<u8>, DownloadError> {
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    Ok(chunks.iter().flat_map(|c| c.to_vec()).collect())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Version(String),
    Probe(String),
    Fetch {
        endpoint: String,
        offset: u64,
        at: Instant,
    },
}

/// Scripted behaviour of one storage node.
#[derive(Debug, Clone)]
pub(crate) struct FakeEndpoint {
    reachable: bool,
    version_delay: Duration,
    availability: Result<bool, u32>,
    probe_delay: Duration,
    fetch_status: Option<u32>,
    body: Bytes,
    chunk_size: usize,
    first_chunk_delay: Duration,
    interrupt_after_chunks: Option<usize>,
}

impl FakeEndpoint {
    pub(crate) fn serving(body: &[u8]) -> Self {
        Self {
            reachable: true,
            version_delay: Duration::ZERO,
            availability: Ok(true),
            probe_delay: Duration::ZERO,
            fetch_status: None,
            body: Bytes::copy_from_slice(body),
            chunk_size: 4,
            first_chunk_delay: Duration::ZERO,
            interrupt_after_chunks: None,
        }
    }

    /// Answers 404 to availability checks.
    pub(crate) fn unavailable() -> Self {
        Self {
            availability: Ok(false),
            ..Self::serving(b"")
        }
    }

    /// Fails every request.
    pub(crate) fn unreachable() -> Self {
        Self {
            reachable: false,
            availability: Err(503),
            fetch_status: Some(503),
            ..Self::serving(b"")
        }
    }

    pub(crate) fn probe_error(status: u32) -> Self {
        Self {
            availability: Err(status),
            ..Self::serving(b"")
        }
    }

    pub(crate) fn version_delay(mut self, delay: Duration) -> Self {
        self.version_delay = delay;
        self
    }

    pub(crate) fn probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub(crate) fn fetch_fails(mut self, status: u32) -> Self {
        self.fetch_status = Some(status);
        self
    }

    pub(crate) fn first_chunk_delay(mut self, delay: Duration) -> Self {
        self.first_chunk_delay = delay;
        self
    }

    pub(crate) fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub(crate) fn interrupt_after_chunks(mut self, chunks: usize) -> Self {
        self.interrupt_after_chunks = Some(chunks);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    endpoints: HashMap<String, FakeEndpoint>,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, name: &str, behaviour: FakeEndpoint) -> Self {
        self.endpoints.insert(endpoint(name).to_string(), behaviour);
        self
    }

    fn lookup(&self, call: Call, endpoint: &Endpoint) -> Result<FakeEndpoint, TransportError> {
        self.calls.lock().unwrap().push(call);
        self.endpoints
            .get(endpoint.as_str())
            .cloned()
            .ok_or(TransportError::NoResponse)
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn version_checks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Version(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn probes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Probe(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// `(endpoint, offset, when)` for every fetch, in call order.
    pub(crate) fn fetch_calls(&self) -> Vec<(String, u64, Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Fetch {
                    endpoint,
                    offset,
                    at,
                } => Some((endpoint, offset, at)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.fetch_calls().into_iter().map(|(e, _, _)| e).collect()
    }
}

#[async_trait]
impl UpstreamTransport for FakeTransport {
    async fn check_version(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let node = self.lookup(Call::Version(endpoint.to_string()), endpoint)?;
        tokio::time::sleep(node.version_delay).await;
        if node.reachable {
            Ok(())
        } else {
            Err(TransportError::Http(503))
        }
    }

    async fn is_object_available(
        &self,
        endpoint: &Endpoint,
        _object_id: &ObjectId,
    ) -> Result<bool, TransportError> {
        let node = self.lookup(Call::Probe(endpoint.to_string()), endpoint)?;
        tokio::time::sleep(node.probe_delay).await;
        node.availability.map_err(TransportError::Http)
    }

    async fn fetch(
        &self,
        endpoint: &Endpoint,
        _object_id: &ObjectId,
        offset: u64,
    ) -> Result<UpstreamBody, TransportError> {
        let call = Call::Fetch {
            endpoint: endpoint.to_string(),
            offset,
            at: Instant::now(),
        };
        let node = self.lookup(call, endpoint)?;
        if let Some(status) = node.fetch_status {
            return Err(TransportError::Http(status));
        }
        let start = (offset as usize).min(node.body.len());
        let data = node.body.slice(start..);
        let mut chunks: Vec<Result<Bytes, TransportError>> = data
            .chunks(node.chunk_size)
            .map(|c| Ok(data.slice_ref(c)))
            .collect();
        if let Some(n) = node.interrupt_after_chunks {
            chunks.truncate(n);
            chunks.push(Err(TransportError::Task("connection reset by peer".into())));
        }
        let delay = node.first_chunk_delay;
        Ok(futures::stream::unfold(
            (Some(delay), chunks.into_iter()),
            |(delay, mut rest)| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                rest.next().map(|item| (item, (None, rest)))
            },
        )
        .boxed())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeDirectory {
    objects: HashMap<ObjectId, ObjectInfo>,
    active: Vec<RawEndpoint>,
    failing: bool,
    lookups: AtomicUsize,
}

impl FakeDirectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub(crate) fn active_node(mut self, bucket_id: &str, root: &str) -> Self {
        self.active.push(RawEndpoint {
            bucket_id: bucket_id.to_string(),
            node_endpoint: Some(root.to_string()),
        });
        self
    }

    fn insert(mut self, id: &str, size: u64, supported: bool, endpoints: Vec<RawEndpoint>) -> Self {
        let object_id = ObjectId::from(id);
        self.objects.insert(
            object_id.clone(),
            ObjectInfo {
                exists: true,
                supported,
                data: Some(ObjectData {
                    object_id,
                    size,
                    content_hash: format!("hash-{id}"),
                    endpoints,
                }),
            },
        );
        self
    }

    /// A supported object held by the named fake nodes.
    pub(crate) fn object(self, id: &str, size: u64, nodes: &[&str]) -> Self {
        let endpoints = nodes
            .iter()
            .map(|n| RawEndpoint {
                bucket_id: n.to_string(),
                node_endpoint: Some(node_root(n)),
            })
            .collect();
        self.insert(id, size, true, endpoints)
    }

    pub(crate) fn object_with_endpoints(self, id: &str, size: u64, endpoints: Vec<RawEndpoint>) -> Self {
        self.insert(id, size, true, endpoints)
    }

    pub(crate) fn unsupported_object(self, id: &str, size: u64) -> Self {
        self.insert(id, size, false, Vec::new())
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn resolve_candidates(&self, object_id: &ObjectId) -> Result<ObjectInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            anyhow::bail!("query node unreachable");
        }
        Ok(self
            .objects
            .get(object_id)
            .cloned()
            .unwrap_or_else(ObjectInfo::not_found))
    }

    async fn active_storage_endpoints(&self) -> Result<Vec<RawEndpoint>> {
        if self.failing {
            anyhow::bail!("query node unreachable");
        }
        Ok(self.active.clone())
    }

    async fn supported_objects(&self) -> Result<HashMap<ObjectId, ObjectSummary>> {
        if self.failing {
            anyhow::bail!("query node unreachable");
        }
        Ok(self
            .objects
            .values()
            .filter(|info| info.supported)
            .filter_map(|info| info.data.as_ref())
            .map(|d| {
                (
                    d.object_id.clone(),
                    ObjectSummary {
                        size: d.size,
                        content_hash: d.content_hash.clone(),
                    },
                )
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    committed: Mutex<HashMap<ObjectId, Bytes>>,
    partial: Mutex<HashMap<ObjectId, Vec<u8>>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_object(self, id: &str, data: &[u8]) -> Self {
        self.committed
            .lock()
            .unwrap()
            .insert(ObjectId::from(id), Bytes::copy_from_slice(data));
        self
    }

    pub(crate) fn with_partial(self, id: &str, data: &[u8]) -> Self {
        self.partial
            .lock()
            .unwrap()
            .insert(ObjectId::from(id), data.to_vec());
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn object(&self, id: &str) -> Option<Bytes> {
        self.committed.lock().unwrap().get(&ObjectId::from(id)).cloned()
    }

    pub(crate) fn partial(&self, id: &str) -> Option<Vec<u8>> {
        self.partial.lock().unwrap().get(&ObjectId::from(id)).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn contains(&self, object_id: &ObjectId) -> bool {
        self.committed.lock().unwrap().contains_key(object_id)
    }

    async fn open(&self, object_id: &ObjectId) -> Result<(u64, ObjectStream)> {
        let Some(data) = self.committed.lock().unwrap().get(object_id).cloned() else {
            anyhow::bail!("object {object_id} not stored");
        };
        let size = data.len() as u64;
        Ok((size, futures::stream::iter([Ok(data)]).boxed()))
    }

    async fn read_range(&self, object_id: &ObjectId, offset: u64, len: usize) -> Result<Bytes> {
        let partial = self.partial.lock().unwrap();
        let data = match partial.get(object_id) {
            Some(p) => Bytes::copy_from_slice(p),
            None => match self.committed.lock().unwrap().get(object_id) {
                Some(c) => c.clone(),
                None => anyhow::bail!("object {object_id} not stored"),
            },
        };
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data.slice(start..end))
    }

    async fn partial_len(&self, object_id: &ObjectId) -> Option<u64> {
        self.partial
            .lock()
            .unwrap()
            .get(object_id)
            .map(|p| p.len() as u64)
    }

    async fn write_chunk(&self, object_id: &ObjectId, offset: u64, chunk: Bytes) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("disk full");
        }
        let mut partial = self.partial.lock().unwrap();
        let buf = partial.entry(object_id.clone()).or_default();
        if (buf.len() as u64) < offset {
            anyhow::bail!("gap before offset {offset}");
        }
        buf.truncate(offset as usize);
        buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(&self, object_id: &ObjectId) -> Result<()> {
        let mut partial = self.partial.lock().unwrap();
        let data = partial.remove(object_id).unwrap_or_default();
        self.committed
            .lock()
            .unwrap()
            .insert(object_id.clone(), Bytes::from(data));
        Ok(())
    }

    async fn discard(&self, object_id: &ObjectId) -> Result<()> {
        self.partial.lock().unwrap().remove(object_id);
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self.committed.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_partial(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self.partial.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn remove(&self, object_id: &ObjectId) -> Result<()> {
        match self.committed.lock().unwrap().remove(object_id) {
            Some(_) => Ok(()),
            None => anyhow::bail!("object {object_id} not stored"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStateStore {
    saved: Mutex<Option<StateSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    pub(crate) fn last_saved(&self) -> Option<StateSnapshot> {
        self.saved.lock().unwrap().clone()
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.saved.lock().unwrap() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
    }
}

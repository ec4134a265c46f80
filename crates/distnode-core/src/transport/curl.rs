//! Storage-node transport on libcurl.
//!
//! Every request runs on the blocking pool. A fetch hands its body back through
//! a bounded channel, so a slow consumer stalls the transfer instead of
//! buffering it in memory.

use std::cell::{Cell, RefCell};
use std::str;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ::curl::easy::{Easy, List};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use super::{parse, TransportError, UpstreamBody, UpstreamTransport};
use crate::endpoint::Endpoint;
use crate::object::ObjectId;

const BODY_CHANNEL_DEPTH: usize = 16;

/// Abort a fetch whose throughput stays below this many bytes/s for `LOW_SPEED_TIME`.
const LOW_SPEED_LIMIT: u32 = 1024;
const LOW_SPEED_TIME: Duration = Duration::from_secs(60);

type HeadSender = oneshot::Sender<Result<(), TransportError>>;
type ChunkSender = mpsc::Sender<Result<Bytes, TransportError>>;

#[derive(Debug, Clone, Copy)]
pub struct CurlTransport {
    request_timeout: Duration,
}

impl CurlTransport {
    /// `request_timeout` bounds version and availability requests, and the
    /// connect phase of fetches.
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl UpstreamTransport for CurlTransport {
    async fn check_version(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let url = endpoint.version_url();
        let timeout = self.request_timeout;
        let code = run_blocking(move || get_discarding_body(&url, timeout)).await?;
        if (200..300).contains(&code) {
            Ok(())
        } else {
            Err(TransportError::Http(code))
        }
    }

    async fn is_object_available(
        &self,
        endpoint: &Endpoint,
        object_id: &ObjectId,
    ) -> Result<bool, TransportError> {
        let url = endpoint.file_url(object_id);
        let timeout = self.request_timeout;
        match run_blocking(move || head_status(&url, timeout)).await? {
            200..=299 => Ok(true),
            404 => Ok(false),
            other => Err(TransportError::Http(other)),
        }
    }

    async fn fetch(
        &self,
        endpoint: &Endpoint,
        object_id: &ObjectId,
        offset: u64,
    ) -> Result<UpstreamBody, TransportError> {
        let url = endpoint.file_url(object_id);
        let connect_timeout = self.request_timeout;
        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);

        tokio::task::spawn_blocking(move || {
            stream_get(&url, offset, connect_timeout, head_tx, chunk_tx)
        });

        head_rx.await.map_err(|_| TransportError::NoResponse)??;

        Ok(futures::stream::unfold(chunk_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
}

fn head_status(url: &str, timeout: Duration) -> Result<u32, TransportError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeout)?;
    easy.timeout(timeout)?;
    easy.perform()?;
    Ok(easy.response_code()?)
}

fn get_discarding_body(url: &str, timeout: Duration) -> Result<u32, TransportError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeout)?;
    easy.timeout(timeout)?;
    let mut headers = List::new();
    headers.append("Connection: close")?;
    easy.http_headers(headers)?;
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform()?;
    }
    Ok(easy.response_code()?)
}

/// Runs on the blocking pool. The header verdict goes to `head_tx` once; body
/// chunks (and a trailing transfer error, if any) go to `chunk_tx`.
fn stream_get(
    url: &str,
    offset: u64,
    connect_timeout: Duration,
    head_tx: HeadSender,
    chunk_tx: ChunkSender,
) {
    let head_tx = RefCell::new(Some(head_tx));
    let respond = |verdict: Result<(), TransportError>| {
        if let Some(tx) = head_tx.borrow_mut().take() {
            let _ = tx.send(verdict);
        }
    };
    let accepted = Cell::new(false);

    match perform_stream_get(url, offset, connect_timeout, &respond, &accepted, &chunk_tx) {
        // No-op when headers were already answered.
        Ok(code) => respond(Err(TransportError::Http(code))),
        Err(err) if accepted.get() => {
            // Fails only if the consumer went away, in which case nobody cares.
            let _ = chunk_tx.blocking_send(Err(err));
        }
        Err(err) => respond(Err(err)),
    }
}

fn perform_stream_get(
    url: &str,
    offset: u64,
    connect_timeout: Duration,
    respond: &dyn Fn(Result<(), TransportError>),
    accepted: &Cell<bool>,
    chunk_tx: &ChunkSender,
) -> Result<u32, TransportError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(connect_timeout)?;
    easy.low_speed_limit(LOW_SPEED_LIMIT)?;
    easy.low_speed_time(LOW_SPEED_TIME)?;
    if offset > 0 {
        easy.range(&format!("{offset}-"))?;
    }

    let status = Cell::new(None::<u32>);
    let range_start = Cell::new(None::<u64>);
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            let line = str::from_utf8(data).unwrap_or_default().trim_end();
            if let Some(code) = parse::status_code(line) {
                status.set(Some(code));
                range_start.set(None);
            } else if let Some(start) = parse::content_range_start(line) {
                range_start.set(Some(start));
            } else if line.is_empty() {
                if let Some(code) = status.get().filter(|c| parse::is_final(*c)) {
                    let verdict = header_verdict(code, offset, range_start.get());
                    accepted.set(verdict.is_ok());
                    respond(verdict);
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            if !accepted.get() {
                // Aborts the transfer: error bodies are not streamed.
                return Ok(0);
            }
            match chunk_tx.blocking_send(Ok(Bytes::copy_from_slice(data))) {
                Ok(()) => Ok(data.len()),
                Err(_) => Ok(0),
            }
        })?;
        transfer.perform()?;
    }
    Ok(easy.response_code()?)
}

fn header_verdict(code: u32, offset: u64, range_start: Option<u64>) -> Result<(), TransportError> {
    if !(200..300).contains(&code) {
        return Err(TransportError::Http(code));
    }
    if offset > 0 && (code != 206 || range_start != Some(offset)) {
        return Err(TransportError::RangeIgnored {
            offset,
            status: code,
        });
    }
    Ok(())
}

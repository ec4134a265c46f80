//! Source selection: availability probes with bounded fan-out, then a fetch
//! from the first endpoint that confirms.

use futures::StreamExt;
use tracing::{debug, error};

use super::DownloadRequest;
use crate::endpoint::Endpoint;
use crate::error::DownloadError;
use crate::pending::{PendingDownload, Phase};
use crate::transport::{DynTransport, UpstreamBody};

enum Attempt {
    Probing,
    CandidateFound(Endpoint),
}

/// Probes are launched in candidate order, at most `probe_cap` at a time, and
/// consumed in completion order. While a fetch is outstanding the probe stream
/// is not polled, so no further probes start.
pub(super) async fn find_source(
    transport: &DynTransport,
    request: &DownloadRequest,
    pending: &PendingDownload,
    probe_cap: usize,
) -> Result<(Endpoint, UpstreamBody), DownloadError> {
    let object_id = &request.object_id;
    let mut probes = futures::stream::iter(request.candidates.iter().cloned())
        .map(|endpoint| {
            let transport = DynTransport::clone(transport);
            let object_id = object_id.clone();
            async move {
                let available = transport.is_object_available(&endpoint, &object_id).await;
                (endpoint, available)
            }
        })
        .buffer_unordered(probe_cap.max(1));

    let mut attempt = Attempt::Probing;
    loop {
        attempt = match attempt {
            Attempt::Probing => match probes.next().await {
                None => {
                    return Err(DownloadError::AllSourcesExhausted {
                        tried: request.candidates.len(),
                    })
                }
                Some((endpoint, Ok(true))) => Attempt::CandidateFound(endpoint),
                Some((endpoint, Ok(false))) => {
                    debug!(object_id = %object_id, endpoint = %endpoint, "data object not available at storage node");
                    Attempt::Probing
                }
                Some((endpoint, Err(err))) => {
                    debug!(object_id = %object_id, endpoint = %endpoint, error = %err, "availability check failed");
                    Attempt::Probing
                }
            },
            Attempt::CandidateFound(endpoint) => {
                pending.set_phase(Phase::Downloading);
                match transport
                    .fetch(&endpoint, object_id, request.start_offset)
                    .await
                {
                    Ok(body) => return Ok((endpoint, body)),
                    Err(err) => {
                        error!(
                            object_id = %object_id,
                            endpoint = %endpoint,
                            error = %err,
                            "fetch failed after availability was confirmed, trying next source"
                        );
                        pending.set_phase(Phase::LookingForSource);
                        Attempt::Probing
                    }
                }
            }
        };
    }
}

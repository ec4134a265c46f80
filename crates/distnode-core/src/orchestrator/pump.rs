//! Drains an accepted upstream body into the store and the shared body.

use futures::StreamExt;
use tracing::{error, warn};

use crate::body::SharedBody;
use crate::error::DownloadError;
use crate::object::ObjectId;
use crate::storage::ObjectStore;
use crate::transport::UpstreamBody;

/// Returns the number of bytes received. Each chunk is written to the store
/// before it is published, so a subscriber behind the in-memory tail can read
/// it back. The store is committed before the body is finished, so anyone
/// woken by the finish finds the object in place.
pub(super) async fn drain(
    store: &dyn ObjectStore,
    body: &SharedBody,
    mut upstream: UpstreamBody,
    expected_size: u64,
) -> Result<u64, DownloadError> {
    let object_id = body.object_id().clone();
    let mut offset = body.start_offset();
    let mut persisting = true;

    let outcome = loop {
        match upstream.next().await {
            Some(Ok(chunk)) => {
                if persisting {
                    if let Err(err) = store.write_chunk(&object_id, offset, chunk.clone()).await {
                        error!(
                            object_id = %object_id,
                            error = %format!("{err:#}"),
                            "cannot persist data object, continuing without caching it"
                        );
                        persisting = false;
                        body.abandon_store();
                        discard(store, &object_id).await;
                    }
                }
                offset += chunk.len() as u64;
                body.push(chunk, persisting);
            }
            Some(Err(err)) => break Err(DownloadError::StreamInterrupted(err.to_string())),
            None if offset != expected_size => {
                break Err(DownloadError::StreamInterrupted(format!(
                    "upstream closed after {offset} of {expected_size} bytes"
                )))
            }
            None => break Ok(()),
        }
    };

    match outcome {
        Ok(()) => {
            if persisting {
                if let Err(err) = store.commit(&object_id).await {
                    error!(object_id = %object_id, error = %format!("{err:#}"), "failed to commit data object");
                    body.abandon_store();
                    discard(store, &object_id).await;
                }
            }
            body.finish();
            Ok(offset - body.start_offset())
        }
        Err(err) => {
            body.fail(err.clone());
            if persisting {
                discard(store, &object_id).await;
            }
            Err(err)
        }
    }
}

pub(super) async fn discard(store: &dyn ObjectStore, object_id: &ObjectId) {
    if let Err(err) = store.discard(object_id).await {
        warn!(object_id = %object_id, error = %format!("{err:#}"), "failed to discard partial data object");
    }
}

//! `distnode fetch <id>` – serve one object through the cache.

use std::path::Path;

use anyhow::{Context, Result};
use distnode_core::config::DistnodeConfig;
use distnode_core::node::Node;
use distnode_core::object::ObjectId;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub async fn run_fetch(cfg: &DistnodeConfig, object_id: &str, output: Option<&Path>) -> Result<()> {
    let node = Node::from_config(cfg).await?;
    let coordinator = node.coordinator();
    // Keep what a stopped node persisted; this process saves over it on exit.
    coordinator.restore_state().await?;
    let id = ObjectId::from(object_id);

    let response = coordinator.request_object(&id).await?;
    tracing::info!(object = %id, origin = ?response.origin, size = response.size, "serving object");

    let written = match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("create {}", path.display()))?;
            copy_stream(response.stream, &mut file).await?
        }
        None => copy_stream(response.stream, &mut tokio::io::stdout()).await?,
    };

    if let Err(e) = coordinator.save_state().await {
        tracing::warn!("could not save state: {:#}", e);
    }
    eprintln!("{}: {} bytes ({:?})", id, written, response.origin);
    Ok(())
}

async fn copy_stream<W>(mut stream: distnode_core::object::ObjectStream, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

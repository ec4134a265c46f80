//! `distnode serve` – run the node until Ctrl-C, then drain pending downloads.

use anyhow::Result;
use distnode_core::config::DistnodeConfig;
use distnode_core::node::Node;

pub async fn run_serve(cfg: &DistnodeConfig) -> Result<()> {
    let mut node = Node::from_config(cfg).await?;
    node.start().await?;
    tracing::info!(worker_id = cfg.worker_id, "distnode running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    let left = node.shutdown().await;
    if left > 0 {
        tracing::warn!("stopped with {} download(s) still pending", left);
    }
    Ok(())
}

//! `distnode probe` – one response-time cycle over active storage nodes.

use anyhow::Result;
use distnode_core::config::DistnodeConfig;
use distnode_core::node::Node;

pub async fn run_probe(cfg: &DistnodeConfig) -> Result<()> {
    let node = Node::from_config(cfg).await?;
    let coordinator = node.coordinator();
    // Keep what a stopped node persisted; this process saves over it on exit.
    coordinator.restore_state().await?;
    coordinator.check_response_times().await;

    let means = coordinator.health().mean_response_times();
    if means.is_empty() {
        println!("No response times recorded.");
    } else {
        println!("{:<10} {}", "MEAN_MS", "ENDPOINT");
        for (endpoint, mean) in means {
            println!("{:<10.1} {}", mean, endpoint);
        }
    }
    coordinator.save_state().await?;
    Ok(())
}

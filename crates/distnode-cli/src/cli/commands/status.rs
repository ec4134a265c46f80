//! `distnode status` – show persisted node state.

use anyhow::Result;
use distnode_core::config::DistnodeConfig;
use distnode_core::node::state_db_path;
use distnode_core::state_db::{StateDb, StateStore};

pub async fn run_status(cfg: &DistnodeConfig) -> Result<()> {
    let db = StateDb::open_at(state_db_path(cfg)?).await?;
    let snapshot = db.load().await?;

    if snapshot.pending.is_empty() {
        println!("No pending downloads.");
    } else {
        println!("{:<20} {:<20} {:<12} {}", "OBJECT", "PHASE", "SIZE", "OFFSET");
        for p in &snapshot.pending {
            println!(
                "{:<20} {:<20} {:<12} {}",
                p.object_id.as_str(),
                p.phase.as_str(),
                p.size,
                p.start_offset
            );
        }
    }

    if !snapshot.response_times.samples.is_empty() {
        println!();
        println!("{:<10} {:<8} {}", "MEAN_MS", "SAMPLES", "ENDPOINT");
        for (endpoint, samples) in &snapshot.response_times.samples {
            let mean = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<u64>() as f64 / samples.len() as f64
            };
            println!("{:<10.1} {:<8} {}", mean, samples.len(), endpoint);
        }
    }
    Ok(())
}

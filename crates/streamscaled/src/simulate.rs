//! Simulate mode — runs a real session against [`SimulatedStream`].
//!
//! Every starting partition writes `load_per_sec` records per second;
//! splits halve a partition's load and merges add the two loads up, so the
//! session converges on the partition count the configured limit implies.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use streamscale_autoscale::{Collaborators, LifecycleHooks, ScalingSession};
use streamscale_client::{LoadProfile, SimulatedStream};
use streamscale_core::ScalingConfig;

pub async fn run(
    config: ScalingConfig,
    shards: u32,
    load_per_sec: f64,
    minutes: Option<u64>,
) -> anyhow::Result<()> {
    let sim = SimulatedStream::with_even_partitions(&config.stream_name, shards);
    for partition in sim.open_partitions() {
        sim.set_load(&partition.id, LoadProfile::Constant(load_per_sec * 60.0));
    }
    info!(
        stream = %config.stream_name,
        shards,
        load_per_sec,
        limit_per_sec = config.shard_limit,
        "simulated stream ready"
    );

    let hooks = LifecycleHooks::new()
        .before_split(|req| info!(shard = %req.partition_to_split, "about to split"))
        .after_merge(|req| {
            info!(
                lower = %req.partition_to_merge,
                upper = %req.adjacent_partition_to_merge,
                "merge finished"
            )
        });

    let session = ScalingSession::new(config, hooks, Collaborators::single(Arc::new(sim.clone())));
    let handle = session.start().await?;

    // ── Wait for the time limit or Ctrl-C ──────────────────────

    match minutes {
        Some(m) => tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(m * 60)) => {
                info!(minutes = m, "simulation time limit reached");
            }
            _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        },
        None => {
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
        }
    }

    handle.stop().await?;

    let open = sim.open_partitions();
    info!(
        open_partitions = open.len(),
        splits = sim.split_requests().len(),
        merges = sim.merge_requests().len(),
        "simulation finished"
    );
    for p in &open {
        println!("{}\t{}\t{}", p.id, p.starting_hash_key, p.ending_hash_key);
    }
    Ok(())
}

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use janus_mr::mapreduce::config::CoordinatorArgs;
use janus_mr::mapreduce::{logging, Coordinator, Workload};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CoordinatorArgs::parse();
    logging::init(args.verbose);

    let workload = Workload::load(&args.workload)
        .with_context(|| format!("loading workload {}", args.workload.display()))?;
    info!(
        partitions = workload.partitions.len(),
        reduce_partitions = workload.reduce_partitions.len(),
        "workload loaded"
    );

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    let coordinator = Arc::new(Coordinator::from_workload(&workload, args.config()));

    let progress = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.report_progress().await })
    };

    Arc::clone(&coordinator).serve(listener).await?;
    progress.await?;

    let snapshot = coordinator.snapshot().await;
    info!(
        maps = snapshot.map.done,
        reduces = snapshot.reduce.done,
        "Done!"
    );
    Ok(())
}

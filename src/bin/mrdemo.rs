use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use janus_mr::mapreduce::config::{CoordinatorConfig, DemoArgs, WorkerConfig};
use janus_mr::mapreduce::workload::{self, WorkloadSpec};
use janus_mr::mapreduce::{logging, Coordinator, FaultMode, Worker, WorkerOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    logging::init(args.verbose);
    if args.workers == 0 {
        bail!("need at least one worker");
    }

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, "demo seed");
    let mut rng = StdRng::seed_from_u64(seed);

    let workload = workload::generate(
        &args.dir,
        &WorkloadSpec {
            files: args.files,
            reduce_partitions: args.reduce_partitions,
            seed: Some(rng.gen()),
            ..WorkloadSpec::default()
        },
    )
    .with_context(|| format!("generating workload in {}", args.dir.display()))?;
    workload.save(&args.dir.join("workload.json"))?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let coordinator = Arc::new(Coordinator::from_workload(
        &workload,
        CoordinatorConfig {
            task_timeout: Duration::from_millis(args.task_timeout_ms),
            ..CoordinatorConfig::default()
        },
    ));
    let server = tokio::spawn(Arc::clone(&coordinator).serve(listener));
    let progress = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.report_progress().await })
    };

    // Every worker but the last misbehaves in some way
    let mut workers = Vec::with_capacity(args.workers);
    for i in 0..args.workers {
        let fault = if i + 1 == args.workers {
            FaultMode::Normal
        } else {
            FaultMode::pick_faulty(&mut rng)
        };
        let config = WorkerConfig {
            fault,
            output_dir: args.dir.clone(),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            seed: Some(rng.gen()),
            ..WorkerConfig::new(format!("Slave{i}"), addr.to_string())
        };
        info!(worker = %config.id, %fault, "starting worker");
        let worker = Worker::new(config)?;
        workers.push(tokio::spawn(worker.run()));
    }

    for handle in workers {
        match handle.await? {
            Ok(WorkerOutcome::Completed(report)) => {
                info!(maps = report.maps.len(), reduces = report.reduces.len(), "worker completed")
            }
            Ok(WorkerOutcome::Crashed { partition, .. }) => {
                warn!(partition = %partition, "worker crashed")
            }
            Ok(WorkerOutcome::NeverStarted) => info!("worker never started"),
            Err(e) => error!(error = %e, "worker failed"),
        }
    }

    coordinator.wait_finished().await;
    progress.await?;
    server.await??;

    let problems = workload.verify(&args.dir)?;
    if !problems.is_empty() {
        for problem in &problems {
            error!("{problem}");
        }
        bail!("{} reduce outputs disagree with the ground truth", problems.len());
    }
    info!(
        reduce_partitions = workload.reduce_partitions.len(),
        "all outputs match the ground truth"
    );
    Ok(())
}

use clap::Parser;
use tracing::info;

use janus_mr::mapreduce::config::WorkerArgs;
use janus_mr::mapreduce::{logging, Worker, WorkerOutcome};

/// Exit status of a worker that simulated a crash
const CRASH_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();
    logging::init(args.verbose);

    let worker = Worker::new(args.config())?;
    match worker.run().await? {
        WorkerOutcome::Completed(report) => {
            info!(maps = ?report.maps, reduces = ?report.reduces, "job done");
        }
        WorkerOutcome::NeverStarted => {}
        WorkerOutcome::Crashed { .. } => std::process::exit(CRASH_EXIT_CODE),
    }
    Ok(())
}

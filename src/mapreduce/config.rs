//! Configuration for the coordinator, workers and the bundled binaries
//!
//! Each binary parses its own clap struct and converts it into the runtime
//! config consumed by the library.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::mapreduce::error::{MrError, Result};
use crate::mapreduce::timeout::DEFAULT_TASK_TIMEOUT;
use crate::mapreduce::worker::FaultMode;

pub const DEFAULT_ADDR: &str = "127.0.0.1:60000";
pub const DEFAULT_LINGER: Duration = Duration::from_secs(3);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LATE_START: Duration = Duration::from_secs(5);
pub const DEFAULT_CRASH_PROBABILITY: f64 = 0.5;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Coordinator runtime settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a worker may hold a task before it is handed out again
    pub task_timeout: Duration,
    /// How long to keep accepting connections after the job finished, so
    /// that polling workers still learn it is done
    pub linger: Duration,
    pub progress_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            linger: DEFAULT_LINGER,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Worker runtime settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: String,
    pub coordinator: String,
    pub app: String,
    /// Where reduce outputs are written; intermediate results sit next to their input
    pub output_dir: PathBuf,
    pub fault: FaultMode,
    /// Chance of crashing at each crash point, only used by `CrashProne`
    pub crash_probability: f64,
    /// Delay before connecting, only used by `LateStart`
    pub late_start: Duration,
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    /// Seed for the fault-injection generator; drawn from entropy if unset
    pub seed: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: "worker".to_string(),
            coordinator: DEFAULT_ADDR.to_string(),
            app: "wc".to_string(),
            output_dir: PathBuf::from("."),
            fault: FaultMode::Normal,
            crash_probability: DEFAULT_CRASH_PROBABILITY,
            late_start: DEFAULT_LATE_START,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            seed: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(id: impl Into<String>, coordinator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coordinator: coordinator.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.crash_probability) {
            return Err(MrError::Config(format!(
                "crash probability {} is outside [0, 1]",
                self.crash_probability
            )));
        }
        if self.id.is_empty() {
            return Err(MrError::Config("worker id must not be empty".to_string()));
        }
        if self.connect_attempts == 0 {
            return Err(MrError::Config(
                "connect attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serve one MapReduce job to polling workers
#[derive(Parser, Debug, Clone)]
#[command(name = "mrcoordinator", version)]
pub struct CoordinatorArgs {
    /// Address to listen on
    #[arg(long, env = "JANUS_MR_ADDR", default_value = DEFAULT_ADDR)]
    pub listen: String,

    /// Workload manifest written by the generator
    #[arg(long, value_name = "FILE")]
    pub workload: PathBuf,

    /// Milliseconds a worker may hold a task before it is reassigned
    #[arg(long, default_value_t = DEFAULT_TASK_TIMEOUT.as_millis() as u64, value_name = "MS")]
    pub task_timeout_ms: u64,

    /// Milliseconds to keep answering late pollers after the job finished
    #[arg(long, default_value_t = DEFAULT_LINGER.as_millis() as u64, value_name = "MS")]
    pub linger_ms: u64,

    /// Milliseconds between progress log lines
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL.as_millis() as u64, value_name = "MS")]
    pub progress_ms: u64,

    #[arg(short, long)]
    pub verbose: bool,
}

impl CoordinatorArgs {
    pub fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            task_timeout: Duration::from_millis(self.task_timeout_ms),
            linger: Duration::from_millis(self.linger_ms),
            progress_interval: Duration::from_millis(self.progress_ms),
        }
    }
}

/// Poll a coordinator for map and reduce work
#[derive(Parser, Debug, Clone)]
#[command(name = "mrworker", version)]
pub struct WorkerArgs {
    /// Worker identity reported with every request
    #[arg(long)]
    pub id: String,

    /// Coordinator address
    #[arg(long, env = "JANUS_MR_ADDR", default_value = DEFAULT_ADDR)]
    pub coordinator: String,

    /// Application to run (see `apps`)
    #[arg(long, default_value = "wc")]
    pub app: String,

    /// Directory for reduce outputs
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Injected failure behaviour
    #[arg(long, value_enum, default_value_t = FaultMode::Normal)]
    pub fault: FaultMode,

    /// Crash chance per crash point for `crash-prone`
    #[arg(long, default_value_t = DEFAULT_CRASH_PROBABILITY)]
    pub crash_probability: f64,

    /// Milliseconds to wait before connecting for `late-start`
    #[arg(long, default_value_t = DEFAULT_LATE_START.as_millis() as u64, value_name = "MS")]
    pub late_start_ms: u64,

    /// Milliseconds between polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64, value_name = "MS")]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,

    /// Seed for fault injection
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl WorkerArgs {
    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            id: self.id.clone(),
            coordinator: self.coordinator.clone(),
            app: self.app.clone(),
            output_dir: self.output_dir.clone(),
            fault: self.fault,
            crash_probability: self.crash_probability,
            late_start: Duration::from_millis(self.late_start_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_attempts: self.connect_attempts,
            seed: self.seed,
        }
    }
}

/// Run an application over its inputs in a single process
#[derive(Parser, Debug, Clone)]
#[command(name = "mrsequential", version)]
pub struct SequentialArgs {
    /// Application to run
    pub app: String,

    /// Input files
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(short, long, default_value = "mr-out-0", value_name = "FILE")]
    pub output: PathBuf,
}

/// Generate a workload and run a coordinator with a crew of workers
#[derive(Parser, Debug, Clone)]
#[command(name = "mrdemo", version)]
pub struct DemoArgs {
    /// Working directory for inputs and outputs
    #[arg(long, default_value = "mr-demo", value_name = "DIR")]
    pub dir: PathBuf,

    /// Number of input partitions
    #[arg(long, default_value_t = 10)]
    pub files: usize,

    /// Number of reduce partitions
    #[arg(long, default_value_t = 4)]
    pub reduce_partitions: usize,

    /// Number of workers; the last one never injects faults
    #[arg(long, default_value_t = 3)]
    pub workers: usize,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = DEFAULT_TASK_TIMEOUT.as_millis() as u64, value_name = "MS")]
    pub task_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64, value_name = "MS")]
    pub poll_interval_ms: u64,

    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_args_convert_to_config() {
        let args = WorkerArgs::parse_from([
            "mrworker",
            "--id",
            "Slave1",
            "--fault",
            "crash-prone",
            "--crash-probability",
            "1.0",
            "--poll-interval-ms",
            "20",
        ]);
        let config = args.config();
        assert_eq!(config.id, "Slave1");
        assert_eq!(config.fault, FaultMode::CrashProne);
        assert_eq!(config.crash_probability, 1.0);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn crash_probability_must_be_a_probability() {
        let config = WorkerConfig {
            crash_probability: 1.5,
            ..WorkerConfig::new("w", DEFAULT_ADDR)
        };
        assert!(matches!(config.validate(), Err(MrError::Config(_))));
    }

    #[test]
    fn coordinator_defaults_match_runtime_defaults() {
        let args = CoordinatorArgs::parse_from(["mrcoordinator", "--workload", "job.json"]);
        let config = args.config();
        assert_eq!(config.task_timeout, DEFAULT_TASK_TIMEOUT);
        assert_eq!(config.linger, DEFAULT_LINGER);
    }
}

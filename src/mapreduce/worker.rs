//! Worker agent
//!
//! A worker opens one connection and keeps it for the whole session:
//! poll, execute whatever was handed out, report, poll again, until the
//! coordinator answers `done`. Fault modes simulate workers that join late,
//! never join, or die in the middle of a task without telling anyone.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::mapreduce::codec::Connection;
use crate::mapreduce::config::WorkerConfig;
use crate::mapreduce::error::{PayloadError, Result};
use crate::mapreduce::payload::Payload;
use crate::mapreduce::protocol::{Request, Response};
use crate::mapreduce::state::TaskKind;

/// Injected failure behaviour, fixed for the life of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum FaultMode {
    /// Always behaves
    Normal,
    /// Sleeps before connecting
    LateStart,
    /// Never connects at all
    NeverStart,
    /// May die after receiving a task, before or after executing it
    CrashProne,
}

impl FaultMode {
    pub const FAULTY: [FaultMode; 3] = [
        FaultMode::LateStart,
        FaultMode::NeverStart,
        FaultMode::CrashProne,
    ];

    /// Draw one of the faulty modes
    pub fn pick_faulty<R: Rng + ?Sized>(rng: &mut R) -> Self {
        *Self::FAULTY.choose(rng).unwrap_or(&FaultMode::CrashProne)
    }
}

impl fmt::Display for FaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultMode::Normal => "normal",
            FaultMode::LateStart => "late-start",
            FaultMode::NeverStart => "never-start",
            FaultMode::CrashProne => "crash-prone",
        };
        f.write_str(name)
    }
}

/// Where a crash-prone worker may die
///
/// Polls are never crash points, only the two steps of a held task. A
/// worker dying between tasks strands nothing for the deadlines to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Task received, nothing executed
    BeforeExecute,
    /// Task executed, completion never reported
    BeforeReport,
}

/// Tasks this worker executed and successfully reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub maps: Vec<String>,
    pub reduces: Vec<String>,
    pub polls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Coordinator said the job is done
    Completed(WorkerReport),
    /// Simulated crash; the task is left for the coordinator to reclaim
    Crashed {
        kind: TaskKind,
        partition: String,
        point: CrashPoint,
        report: WorkerReport,
    },
    NeverStarted,
}

pub struct Worker {
    config: WorkerConfig,
    payload: Payload,
    rng: StdRng,
    report: WorkerReport,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let payload = Payload::new(&config.app, config.output_dir.clone())?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            payload,
            rng,
            report: WorkerReport::default(),
        })
    }

    pub async fn run(mut self) -> Result<WorkerOutcome> {
        info!(worker = %self.config.id, fault = %self.config.fault, "worker starting");
        match self.config.fault {
            FaultMode::NeverStart => {
                info!(worker = %self.config.id, "never connecting");
                return Ok(WorkerOutcome::NeverStarted);
            }
            FaultMode::LateStart => {
                info!(worker = %self.config.id, delay = ?self.config.late_start, "joining late");
                tokio::time::sleep(self.config.late_start).await;
            }
            FaultMode::Normal | FaultMode::CrashProne => {}
        }

        let mut conn = Connection::new(self.connect().await?);
        let outcome = self.session(&mut conn).await?;
        match &outcome {
            WorkerOutcome::Crashed {
                kind,
                partition,
                point,
                ..
            } => {
                // Dropping the socket without a word is the crash
                warn!(worker = %self.config.id, %kind, partition = %partition, ?point, "worker crashed");
            }
            _ => {
                let _ = conn.shutdown().await;
                info!(
                    worker = %self.config.id,
                    maps = self.report.maps.len(),
                    reduces = self.report.reduces.len(),
                    "worker closed"
                );
            }
        }
        Ok(outcome)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut attempt = 1;
        loop {
            match TcpStream::connect(&self.config.coordinator).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(worker = %self.config.id, addr = %self.config.coordinator, "connected");
                    return Ok(stream);
                }
                Err(e) if attempt < self.config.connect_attempts => {
                    debug!(worker = %self.config.id, attempt, error = %e, "coordinator not reachable yet");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        self.config.poll_interval.max(Duration::from_millis(10))
    }

    async fn session(&mut self, conn: &mut Connection) -> Result<WorkerOutcome> {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            self.report.polls += 1;
            let mut response: Response = conn
                .exchange(Request::Poll {
                    worker_id: self.config.id.clone(),
                })
                .await?;

            // A report may be answered with more instructions
            loop {
                response = match response {
                    Response::Idle => break,
                    Response::Done => {
                        return Ok(WorkerOutcome::Completed(self.report.clone()));
                    }
                    Response::Map { partition } => {
                        if let Some(point) = self.crash_roll(CrashPoint::BeforeExecute) {
                            return Ok(self.crashed(TaskKind::Map, partition, point));
                        }
                        let result_ref = self.execute_map(&partition).await?;
                        if let Some(point) = self.crash_roll(CrashPoint::BeforeReport) {
                            return Ok(self.crashed(TaskKind::Map, partition, point));
                        }
                        let reply: Response = conn
                            .exchange(Request::MapDone {
                                worker_id: self.config.id.clone(),
                                partition: partition.clone(),
                                result_ref,
                            })
                            .await?;
                        self.report.maps.push(partition);
                        reply
                    }
                    Response::Reduce {
                        partition,
                        results,
                        keys,
                    } => {
                        if let Some(point) = self.crash_roll(CrashPoint::BeforeExecute) {
                            return Ok(self.crashed(TaskKind::Reduce, partition, point));
                        }
                        self.execute_reduce(&partition, results, keys).await?;
                        if let Some(point) = self.crash_roll(CrashPoint::BeforeReport) {
                            return Ok(self.crashed(TaskKind::Reduce, partition, point));
                        }
                        let reply: Response = conn
                            .exchange(Request::ReduceDone {
                                worker_id: self.config.id.clone(),
                                partition: partition.clone(),
                            })
                            .await?;
                        self.report.reduces.push(partition);
                        reply
                    }
                };
            }
        }
    }

    /// Whether a crash-prone worker dies at `point`
    fn crash_roll(&mut self, point: CrashPoint) -> Option<CrashPoint> {
        if self.config.fault != FaultMode::CrashProne {
            return None;
        }
        (self.rng.gen::<f64>() < self.config.crash_probability).then_some(point)
    }

    fn crashed(&self, kind: TaskKind, partition: String, point: CrashPoint) -> WorkerOutcome {
        WorkerOutcome::Crashed {
            kind,
            partition,
            point,
            report: self.report.clone(),
        }
    }

    async fn execute_map(&self, partition: &str) -> Result<String> {
        info!(worker = %self.config.id, partition, "map");
        let payload = self.payload.clone();
        let partition = partition.to_string();
        let writer = self.config.id.clone();
        let result = tokio::task::spawn_blocking(move || payload.run_map(&partition, &writer))
            .await
            .map_err(|e| PayloadError::Aborted(e.to_string()))??;
        Ok(result)
    }

    async fn execute_reduce(
        &self,
        partition: &str,
        results: Vec<String>,
        keys: Vec<String>,
    ) -> Result<()> {
        info!(worker = %self.config.id, partition, results = results.len(), keys = keys.len(), "reduce");
        let payload = self.payload.clone();
        let partition = partition.to_string();
        let writer = self.config.id.clone();
        tokio::task::spawn_blocking(move || {
            payload.run_reduce(&partition, &results, &keys, &writer)
        })
        .await
        .map_err(|e| PayloadError::Aborted(e.to_string()))??;
        Ok(())
    }
}

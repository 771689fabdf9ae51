//! Coordinator server
//!
//! Accepts worker connections and runs one handler task per connection. A
//! handler decodes a request, applies it to the shared [`JobState`] under the
//! job lock, and writes the reply. Grants arm a deadline in the
//! [`TimeoutMonitor`]; nothing else ever reclaims a task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::mapreduce::codec::Connection;
use crate::mapreduce::config::CoordinatorConfig;
use crate::mapreduce::error::Result;
use crate::mapreduce::protocol::{Request, Response};
use crate::mapreduce::state::{Grant, JobSnapshot, JobState, Phase};
use crate::mapreduce::timeout::TimeoutMonitor;
use crate::mapreduce::workload::Workload;

pub struct Coordinator {
    state: Arc<Mutex<JobState>>,
    monitor: TimeoutMonitor,
    config: CoordinatorConfig,
    finished: watch::Sender<bool>,
}

impl Coordinator {
    /// `partitions` become map tasks; each `(id, keys)` becomes a reduce task
    pub fn new<P, R>(partitions: P, reduce_partitions: R, config: CoordinatorConfig) -> Self
    where
        P: IntoIterator<Item = String>,
        R: IntoIterator<Item = (String, Vec<String>)>,
    {
        let state = JobState::new(partitions, reduce_partitions);
        let (finished, _) = watch::channel(state.phase() == Phase::Finished);
        let state = Arc::new(Mutex::new(state));
        let monitor = TimeoutMonitor::new(Arc::clone(&state), config.task_timeout);
        Self {
            state,
            monitor,
            config,
            finished,
        }
    }

    pub fn from_workload(workload: &Workload, config: CoordinatorConfig) -> Self {
        Self::new(
            workload.partitions.iter().cloned(),
            workload.reduce_assignments(),
            config,
        )
    }

    /// Apply one request and produce the reply
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut state = self.state.lock().await;
        let response = match request {
            Request::Poll { worker_id } => {
                let grant = state.request_work(&worker_id);
                if let Some((kind, partition, generation)) = grant.assignment() {
                    self.monitor
                        .watch(self.monitor.assignment(kind, partition, generation));
                    info!(worker = %worker_id, %kind, partition, "task handed out");
                }
                match grant {
                    Grant::Map { partition, .. } => Response::Map { partition },
                    Grant::Reduce {
                        partition,
                        results,
                        keys,
                        ..
                    } => Response::Reduce {
                        partition,
                        results,
                        keys,
                    },
                    Grant::Idle => Response::Idle,
                    Grant::Done => Response::Done,
                }
            }
            Request::MapDone {
                worker_id,
                partition,
                result_ref,
            } => {
                state.report_map_done(&worker_id, &partition, &result_ref);
                Response::Idle
            }
            Request::ReduceDone {
                worker_id,
                partition,
            } => {
                state.report_reduce_done(&worker_id, &partition);
                if state.phase() == Phase::Finished {
                    Response::Done
                } else {
                    Response::Idle
                }
            }
        };
        let phase = state.phase();
        drop(state);

        if phase == Phase::Finished && !*self.finished.borrow() {
            info!("job finished");
            self.finished.send_replace(true);
        }
        response
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once every reduce task is done
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Accept workers until the job is finished, then keep answering late
    /// pollers for the configured linger period.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "coordinator listening");

        {
            let finished = self.wait_finished();
            tokio::pin!(finished);
            loop {
                tokio::select! {
                    _ = &mut finished => break,
                    accepted = listener.accept() => self.accepted(accepted),
                }
            }
        }

        debug!(linger = ?self.config.linger, "lingering for late pollers");
        let linger = tokio::time::sleep(self.config.linger);
        tokio::pin!(linger);
        loop {
            tokio::select! {
                _ = &mut linger => break,
                accepted = listener.accept() => self.accepted(accepted),
            }
        }
        Ok(())
    }

    /// Log the task counts of the current phase until the job finishes
    pub async fn report_progress(&self) {
        if self.config.progress_interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(self.config.progress_interval);
        let finished = self.wait_finished();
        tokio::pin!(finished);
        loop {
            tokio::select! {
                _ = &mut finished => break,
                _ = ticker.tick() => {
                    let s = self.snapshot().await;
                    let counts = match s.phase {
                        Phase::Mapping => s.map,
                        _ => s.reduce,
                    };
                    info!(
                        phase = %s.phase,
                        unassigned = counts.unassigned,
                        assigned = counts.assigned,
                        done = counts.done,
                        total = counts.total(),
                        "not done yet"
                    );
                }
            }
        }
    }

    fn accepted(self: &Arc<Self>, accepted: std::io::Result<(TcpStream, SocketAddr)>) {
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "worker connected");
                let coordinator = Arc::clone(self);
                tokio::spawn(async move { coordinator.handle_connection(stream, peer).await });
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }

    /// Owns one worker connection until the worker is told the job is done
    /// or the connection breaks. Errors never leave this task.
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not disable nagle");
        }
        let mut conn = Connection::new(stream);

        loop {
            let request = match conn.recv::<Request>().await {
                Ok(request) => request,
                Err(e) if e.is_closed() => {
                    debug!(%peer, "worker disconnected");
                    return;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "dropping connection");
                    return;
                }
            };

            let response = self.dispatch(request).await;
            let done = response == Response::Done;
            if let Err(e) = conn.send(response).await {
                warn!(%peer, error = %e, "failed to reply, dropping connection");
                return;
            }
            if done {
                debug!(%peer, "worker released");
                let _ = conn.shutdown().await;
                return;
            }
        }
    }
}

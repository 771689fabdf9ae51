//! Per-assignment deadlines
//!
//! Every grant gets a one-shot timer. When it fires it takes the job lock and
//! reverts the task, but only if the same grant is still outstanding. Workers
//! are never probed; a silent worker is indistinguishable from a slow one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::mapreduce::state::{JobState, TaskKind};

/// Default time a worker has to report a task
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(15);

/// One outstanding grant being watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub kind: TaskKind,
    pub partition: String,
    pub generation: u64,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct TimeoutMonitor {
    state: Arc<Mutex<JobState>>,
    timeout: Duration,
}

impl TimeoutMonitor {
    pub fn new(state: Arc<Mutex<JobState>>, timeout: Duration) -> Self {
        Self { state, timeout }
    }

    /// Record for a grant made now
    pub fn assignment(&self, kind: TaskKind, partition: &str, generation: u64) -> Assignment {
        Assignment {
            kind,
            partition: partition.to_string(),
            generation,
            deadline: Instant::now() + self.timeout,
        }
    }

    /// Arm the deadline. The handle resolves to whether the task was reverted.
    pub fn watch(&self, assignment: Assignment) -> JoinHandle<bool> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep_until(assignment.deadline).await;
            let mut state = state.lock().await;
            state.expire(
                assignment.kind,
                &assignment.partition,
                assignment.generation,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::state::{Grant, TaskStatus};

    fn setup() -> (Arc<Mutex<JobState>>, TimeoutMonitor) {
        let state = Arc::new(Mutex::new(JobState::new(
            vec!["file_0.txt".to_string(), "file_1.txt".to_string()],
            vec![("Slave0".to_string(), vec!["a".to_string()])],
        )));
        let monitor = TimeoutMonitor::new(Arc::clone(&state), DEFAULT_TASK_TIMEOUT);
        (state, monitor)
    }

    async fn grant_map(state: &Arc<Mutex<JobState>>, monitor: &TimeoutMonitor) -> Assignment {
        let grant = state.lock().await.request_work("w0");
        let Grant::Map {
            partition,
            generation,
        } = grant
        else {
            panic!("expected a map grant, got {:?}", grant);
        };
        monitor.assignment(TaskKind::Map, &partition, generation)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_loses_its_task_at_the_deadline() {
        let (state, monitor) = setup();
        let assignment = grant_map(&state, &monitor).await;
        let key = assignment.partition.clone();
        let handle = monitor.watch(assignment);

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(matches!(
            state.lock().await.status(TaskKind::Map, &key),
            Some(TaskStatus::Assigned { .. })
        ));

        assert!(handle.await.unwrap());
        assert_eq!(
            state.lock().await.status(TaskKind::Map, &key),
            Some(TaskStatus::Unassigned)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_task_survives_its_deadline() {
        let (state, monitor) = setup();
        let assignment = grant_map(&state, &monitor).await;
        let key = assignment.partition.clone();
        let handle = monitor.watch(assignment);

        state
            .lock()
            .await
            .report_map_done("w0", &key, "file_0.txt.json");

        assert!(!handle.await.unwrap());
        assert_eq!(
            state.lock().await.status(TaskKind::Map, &key),
            Some(TaskStatus::Done)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_deadline_ignores_a_newer_grant() {
        let (state, monitor) = setup();
        let first = grant_map(&state, &monitor).await;
        let key = first.partition.clone();
        assert!(monitor.watch(first).await.unwrap());

        // Reassigned to someone else, then the old deadline is replayed
        let second = grant_map(&state, &monitor).await;
        assert_eq!(second.partition, key);
        let replay = Assignment {
            generation: second.generation - 1,
            ..second.clone()
        };
        assert!(!monitor.watch(replay).await.unwrap());
        assert_eq!(
            state.lock().await.status(TaskKind::Map, &key),
            Some(TaskStatus::Assigned {
                generation: second.generation
            })
        );
    }
}

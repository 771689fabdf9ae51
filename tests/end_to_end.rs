//! Real coordinator, real workers, loopback TCP

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use janus_mr::mapreduce::config::{CoordinatorConfig, WorkerConfig};
use janus_mr::mapreduce::worker::CrashPoint;
use janus_mr::mapreduce::workload::{self, WorkloadSpec};
use janus_mr::mapreduce::{
    Coordinator, FaultMode, Phase, TaskKind, Worker, WorkerOutcome, Workload,
};

const DEADLINE: Duration = Duration::from_secs(30);

struct Harness {
    dir: TempDir,
    workload: Workload,
    coordinator: Arc<Coordinator>,
    addr: SocketAddr,
    server: JoinHandle<janus_mr::Result<()>>,
}

impl Harness {
    async fn start(files: usize, reduce_partitions: usize, task_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let workload = workload::generate(
            dir.path(),
            &WorkloadSpec {
                files,
                reduce_partitions,
                words_per_file: 20..=60,
                seed: Some(files as u64 * 31 + reduce_partitions as u64),
            },
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Arc::new(Coordinator::from_workload(
            &workload,
            CoordinatorConfig {
                task_timeout,
                linger: Duration::from_secs(2),
                progress_interval: Duration::ZERO,
            },
        ));
        let server = tokio::spawn(Arc::clone(&coordinator).serve(listener));
        Self {
            dir,
            workload,
            coordinator,
            addr,
            server,
        }
    }

    fn worker(&self, id: &str, fault: FaultMode) -> WorkerConfig {
        WorkerConfig {
            fault,
            output_dir: self.dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(10),
            seed: Some(7),
            ..WorkerConfig::new(id, self.addr.to_string())
        }
    }

    fn spawn(&self, config: WorkerConfig) -> JoinHandle<janus_mr::Result<WorkerOutcome>> {
        let worker = Worker::new(config).unwrap();
        tokio::spawn(worker.run())
    }

    async fn finish(self) {
        tokio::time::timeout(DEADLINE, self.coordinator.wait_finished())
            .await
            .expect("job did not finish");
        assert_eq!(self.coordinator.phase().await, Phase::Finished);
        let problems = self.workload.verify(self.dir.path()).unwrap();
        assert!(problems.is_empty(), "wrong outputs: {problems:?}");
        self.server.await.unwrap().unwrap();
    }
}

async fn outcome(handle: JoinHandle<janus_mr::Result<WorkerOutcome>>) -> WorkerOutcome {
    tokio::time::timeout(DEADLINE, handle)
        .await
        .expect("worker hung")
        .unwrap()
        .unwrap()
}

fn completed(outcome: WorkerOutcome) -> janus_mr::mapreduce::WorkerReport {
    match outcome {
        WorkerOutcome::Completed(report) => report,
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashed_tasks_are_recovered_by_the_surviving_worker() {
    let h = Harness::start(3, 2, Duration::from_millis(300)).await;

    // Both crash-prone workers take a map task and die holding it
    for id in ["crashy0", "crashy1"] {
        let config = WorkerConfig {
            crash_probability: 1.0,
            ..h.worker(id, FaultMode::CrashProne)
        };
        match outcome(h.spawn(config)).await {
            WorkerOutcome::Crashed { kind, .. } => assert_eq!(kind, TaskKind::Map),
            other => panic!("expected a crash, got {other:?}"),
        }
    }
    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.map.done, 0);

    let report = completed(outcome(h.spawn(h.worker("steady", FaultMode::Normal))).await);
    let mut maps = report.maps.clone();
    maps.sort();
    let mut partitions = h.workload.partitions.clone();
    partitions.sort();
    assert_eq!(maps, partitions);
    assert_eq!(report.reduces.len(), 2);

    h.finish().await;
}

/// A worker seed whose first crash roll at `probability` survives and whose
/// second one dies. Workers draw one `f64` per roll from `StdRng`.
fn seed_dying_on_second_roll(probability: f64) -> u64 {
    (0..4096)
        .find(|&seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            rng.gen::<f64>() >= probability && rng.gen::<f64>() < probability
        })
        .expect("no seed in range")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreported_map_result_is_redone_and_counted_once() {
    let h = Harness::start(1, 2, Duration::from_millis(300)).await;
    let partition = h.workload.partitions[0].clone();

    let config = WorkerConfig {
        crash_probability: 0.5,
        seed: Some(seed_dying_on_second_roll(0.5)),
        ..h.worker("crashy", FaultMode::CrashProne)
    };
    match outcome(h.spawn(config)).await {
        WorkerOutcome::Crashed {
            kind,
            partition: lost,
            point,
            report,
        } => {
            assert_eq!(kind, TaskKind::Map);
            assert_eq!(point, CrashPoint::BeforeReport);
            assert_eq!(lost, partition);
            assert!(report.maps.is_empty());
        }
        other => panic!("expected a crash before reporting, got {other:?}"),
    }
    // The result is on disk but the coordinator never heard of it
    assert!(Path::new(&format!("{partition}.json")).exists());
    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.map.done, 0);
    assert_eq!(snapshot.results, 0);

    let report = completed(outcome(h.spawn(h.worker("steady", FaultMode::Normal))).await);
    assert_eq!(report.maps, vec![partition]);
    assert_eq!(report.reduces.len(), 2);
    assert_eq!(h.coordinator.snapshot().await.results, 1);

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_worker_only_receives_unfinished_work() {
    let h = Harness::start(8, 3, Duration::from_secs(10)).await;
    let early = h.spawn(WorkerConfig {
        poll_interval: Duration::from_millis(25),
        ..h.worker("early", FaultMode::Normal)
    });

    let progressed = tokio::time::timeout(DEADLINE, async {
        loop {
            let snapshot = h.coordinator.snapshot().await;
            if snapshot.map.done >= 2 {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no map progress");

    let late = h.spawn(WorkerConfig {
        late_start: Duration::from_millis(20),
        ..h.worker("late", FaultMode::LateStart)
    });

    let early = completed(outcome(early).await);
    let late = completed(outcome(late).await);

    let already_done: HashSet<_> = progressed.maps_done.iter().collect();
    assert!(late.maps.iter().all(|m| !already_done.contains(m)));
    // Between them every task ran exactly once
    assert_eq!(early.maps.len() + late.maps.len(), 8);
    assert_eq!(early.reduces.len() + late.reduces.len(), 3);

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn absent_worker_does_not_block_the_job() {
    let h = Harness::start(4, 2, Duration::from_secs(10)).await;
    let ghost = h.spawn(h.worker("ghost", FaultMode::NeverStart));
    let steady = h.spawn(h.worker("steady", FaultMode::Normal));

    assert_eq!(outcome(ghost).await, WorkerOutcome::NeverStarted);
    let report = completed(outcome(steady).await);
    assert_eq!(report.maps.len(), 4);

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn more_workers_than_tasks_each_task_runs_once() {
    let h = Harness::start(2, 1, Duration::from_secs(10)).await;
    let handles: Vec<_> = (0..5)
        .map(|i| h.spawn(h.worker(&format!("w{i}"), FaultMode::Normal)))
        .collect();

    let mut maps = Vec::new();
    let mut reduces = Vec::new();
    for handle in handles {
        let report = completed(outcome(handle).await);
        maps.extend(report.maps);
        reduces.extend(report.reduces);
    }
    let unique: HashSet<_> = maps.iter().collect();
    assert_eq!(maps.len(), 2);
    assert_eq!(unique.len(), 2);
    assert_eq!(reduces.len(), 1);

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_frame_only_kills_its_own_connection() {
    let h = Harness::start(2, 1, Duration::from_secs(10)).await;

    let mut rogue = TcpStream::connect(h.addr).await.unwrap();
    rogue.write_u32(5).await.unwrap();
    rogue.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(DEADLINE, rogue.read(&mut buf))
        .await
        .expect("server kept the rogue connection open");
    assert!(matches!(read, Ok(0) | Err(_)));

    let report = completed(outcome(h.spawn(h.worker("steady", FaultMode::Normal))).await);
    assert_eq!(report.maps.len(), 2);

    h.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_arriving_after_the_end_is_told_done() {
    let h = Harness::start(1, 1, Duration::from_secs(10)).await;
    completed(outcome(h.spawn(h.worker("first", FaultMode::Normal))).await);
    assert!(h.coordinator.is_finished());

    let straggler = completed(outcome(h.spawn(h.worker("straggler", FaultMode::Normal))).await);
    assert!(straggler.maps.is_empty());
    assert!(straggler.reduces.is_empty());
    assert_eq!(straggler.polls, 1);

    h.finish().await;
}

//! Task-assignment state machine
//!
//! [`JobState`] is plain data with synchronous transitions. The coordinator
//! keeps it behind one mutex, so every method here runs as a single atomic
//! step, including the decision to move to the next phase.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Stage of the job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    Mapping,
    Reducing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Mapping => "mapping",
            Phase::Reducing => "reducing",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => f.write_str("map"),
            TaskKind::Reduce => f.write_str("reduce"),
        }
    }
}

/// Status of one task. `Assigned` remembers which grant is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Unassigned,
    Assigned { generation: u64 },
    Done,
}

/// What happened to a completion report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Task moved to `Done`
    Accepted,
    /// Task was already `Done`
    Duplicate,
    /// Task id not in the table
    Unknown,
    /// Report belongs to a phase the job is not in
    WrongPhase,
}

/// Tasks of one phase, enumerated in insertion order
#[derive(Debug, Clone, Default)]
struct TaskTable {
    entries: Vec<(String, TaskStatus)>,
    index: HashMap<String, usize>,
}

impl TaskTable {
    fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut table = TaskTable::default();
        for key in keys {
            if table.index.contains_key(&key) {
                continue;
            }
            table.index.insert(key.clone(), table.entries.len());
            table.entries.push((key, TaskStatus::Unassigned));
        }
        table
    }

    fn get(&self, key: &str) -> Option<TaskStatus> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    /// Grant the first unassigned task, if any
    fn assign_first(&mut self, generation: u64) -> Option<&str> {
        let (key, status) = self
            .entries
            .iter_mut()
            .find(|(_, status)| *status == TaskStatus::Unassigned)?;
        *status = TaskStatus::Assigned { generation };
        Some(key.as_str())
    }

    fn complete(&mut self, key: &str) -> Completion {
        let Some(&i) = self.index.get(key) else {
            return Completion::Unknown;
        };
        let status = &mut self.entries[i].1;
        if *status == TaskStatus::Done {
            return Completion::Duplicate;
        }
        *status = TaskStatus::Done;
        Completion::Accepted
    }

    fn revert(&mut self, key: &str, generation: u64) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        let status = &mut self.entries[i].1;
        if *status == (TaskStatus::Assigned { generation }) {
            *status = TaskStatus::Unassigned;
            true
        } else {
            false
        }
    }

    fn all_done(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, status)| *status == TaskStatus::Done)
    }

    fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for (_, status) in &self.entries {
            match status {
                TaskStatus::Unassigned => counts.unassigned += 1,
                TaskStatus::Assigned { .. } => counts.assigned += 1,
                TaskStatus::Done => counts.done += 1,
            }
        }
        counts
    }

    fn done_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, status)| *status == TaskStatus::Done)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// A grant handed out by [`JobState::request_work`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Map {
        partition: String,
        generation: u64,
    },
    Reduce {
        partition: String,
        generation: u64,
        results: Vec<String>,
        keys: Vec<String>,
    },
    /// Everything is assigned or done but the phase has not advanced
    Idle,
    /// Job finished
    Done,
}

impl Grant {
    /// Kind, key and generation of a real assignment
    pub fn assignment(&self) -> Option<(TaskKind, &str, u64)> {
        match self {
            Grant::Map {
                partition,
                generation,
            } => Some((TaskKind::Map, partition, *generation)),
            Grant::Reduce {
                partition,
                generation,
                ..
            } => Some((TaskKind::Reduce, partition, *generation)),
            Grant::Idle | Grant::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub unassigned: usize,
    pub assigned: usize,
    pub done: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.unassigned + self.assigned + self.done
    }
}

/// Point-in-time view of the job for logging and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub phase: Phase,
    pub map: TaskCounts,
    pub reduce: TaskCounts,
    pub maps_done: Vec<String>,
    pub reduces_done: Vec<String>,
    pub results: usize,
}

/// The authoritative job state
#[derive(Debug, Clone)]
pub struct JobState {
    phase: Phase,
    map_tasks: TaskTable,
    reduce_tasks: TaskTable,
    reduce_keys: HashMap<String, Vec<String>>,
    results: Vec<String>,
    seen_results: HashSet<String>,
    next_generation: u64,
}

impl JobState {
    /// Build the job from its input partitions and the keys each reduce
    /// partition is responsible for. Duplicate ids are collapsed.
    pub fn new<P, R>(partitions: P, reduce_partitions: R) -> Self
    where
        P: IntoIterator<Item = String>,
        R: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut reduce_ids = Vec::new();
        let mut reduce_keys = HashMap::new();
        for (id, keys) in reduce_partitions {
            reduce_ids.push(id.clone());
            reduce_keys.entry(id).or_insert(keys);
        }

        let mut state = Self {
            phase: Phase::Mapping,
            map_tasks: TaskTable::new(partitions),
            reduce_tasks: TaskTable::new(reduce_ids),
            reduce_keys,
            results: Vec::new(),
            seen_results: HashSet::new(),
            next_generation: 0,
        };
        // Empty tables are vacuously complete
        state.advance();
        state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self, kind: TaskKind, key: &str) -> Option<TaskStatus> {
        self.table(kind).get(key)
    }

    /// Intermediate results registered so far, in arrival order
    pub fn results(&self) -> &[String] {
        &self.results
    }

    /// Hand the first unassigned task of the current phase to `worker_id`
    pub fn request_work(&mut self, worker_id: &str) -> Grant {
        let generation = self.next_generation;
        let grant = match self.phase {
            Phase::Mapping => match self.map_tasks.assign_first(generation) {
                Some(partition) => Grant::Map {
                    partition: partition.to_string(),
                    generation,
                },
                None => Grant::Idle,
            },
            Phase::Reducing => match self.reduce_tasks.assign_first(generation) {
                Some(partition) => {
                    let partition = partition.to_string();
                    let keys = self.reduce_keys.get(&partition).cloned().unwrap_or_default();
                    Grant::Reduce {
                        partition,
                        generation,
                        results: self.results.clone(),
                        keys,
                    }
                }
                None => Grant::Idle,
            },
            Phase::Finished => Grant::Done,
        };

        if let Some((kind, key, generation)) = grant.assignment() {
            self.next_generation += 1;
            debug!(worker = worker_id, %kind, partition = key, generation, "task assigned");
        }
        grant
    }

    /// Record a finished map task and its intermediate result
    pub fn report_map_done(
        &mut self,
        worker_id: &str,
        partition: &str,
        result_ref: &str,
    ) -> Completion {
        if self.phase != Phase::Mapping {
            warn!(
                worker = worker_id,
                partition,
                phase = %self.phase,
                "ignoring map report outside the mapping phase"
            );
            return Completion::WrongPhase;
        }

        let completion = self.map_tasks.complete(partition);
        match completion {
            Completion::Accepted => {
                if self.seen_results.insert(result_ref.to_string()) {
                    self.results.push(result_ref.to_string());
                }
                debug!(worker = worker_id, partition, result = result_ref, "map task done");
                self.advance();
            }
            Completion::Duplicate => {
                debug!(worker = worker_id, partition, "discarding duplicate map report");
            }
            Completion::Unknown => {
                warn!(worker = worker_id, partition, "ignoring report for unknown map task");
            }
            Completion::WrongPhase => {}
        }
        completion
    }

    /// Record a finished reduce task
    pub fn report_reduce_done(&mut self, worker_id: &str, partition: &str) -> Completion {
        if self.phase != Phase::Reducing {
            warn!(
                worker = worker_id,
                partition,
                phase = %self.phase,
                "ignoring reduce report outside the reducing phase"
            );
            return Completion::WrongPhase;
        }

        let completion = self.reduce_tasks.complete(partition);
        match completion {
            Completion::Accepted => {
                debug!(worker = worker_id, partition, "reduce task done");
                self.advance();
            }
            Completion::Duplicate => {
                debug!(worker = worker_id, partition, "discarding duplicate reduce report");
            }
            Completion::Unknown => {
                warn!(worker = worker_id, partition, "ignoring report for unknown reduce task");
            }
            Completion::WrongPhase => {}
        }
        completion
    }

    /// Deadline for grant `generation` fired. Reverts the task only if that
    /// exact grant is still outstanding.
    pub fn expire(&mut self, kind: TaskKind, key: &str, generation: u64) -> bool {
        let reverted = match kind {
            TaskKind::Map => self.map_tasks.revert(key, generation),
            TaskKind::Reduce => self.reduce_tasks.revert(key, generation),
        };
        if reverted {
            info!(%kind, partition = key, generation, "assignment timed out, task returned to pool");
        }
        reverted
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            phase: self.phase,
            map: self.map_tasks.counts(),
            reduce: self.reduce_tasks.counts(),
            maps_done: self.map_tasks.done_keys(),
            reduces_done: self.reduce_tasks.done_keys(),
            results: self.results.len(),
        }
    }

    fn table(&self, kind: TaskKind) -> &TaskTable {
        match kind {
            TaskKind::Map => &self.map_tasks,
            TaskKind::Reduce => &self.reduce_tasks,
        }
    }

    fn advance(&mut self) {
        if self.phase == Phase::Mapping && self.map_tasks.all_done() {
            self.phase = Phase::Reducing;
            info!(results = self.results.len(), "all map tasks done, reducing");
        }
        if self.phase == Phase::Reducing && self.reduce_tasks.all_done() {
            self.phase = Phase::Finished;
            info!("all reduce tasks done, job finished");
        }
    }
}

pub mod apps;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod payload;
pub mod protocol;
pub mod state;
pub mod timeout;
pub mod util;
pub mod worker;
pub mod workload;

pub use coordinator::Coordinator;
pub use state::{JobSnapshot, Phase, TaskKind, TaskStatus};
pub use util::KeyValue;
pub use worker::{FaultMode, Worker, WorkerOutcome, WorkerReport};
pub use workload::{Workload, WorkloadSpec};

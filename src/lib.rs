//! janus-mr - a fault-tolerant MapReduce coordinator and worker
//!
//! A coordinator hands out one map task per input partition and then one
//! reduce task per output partition to whichever worker asks next. Workers
//! hold a single framed TCP connection to the coordinator and poll it for
//! work. Assignments that are not reported back before their deadline are
//! reverted and handed to the next worker that asks.
//!
//! # Layout
//!
//! - [`mapreduce::protocol`] / [`mapreduce::codec`]: wire messages and framing
//! - [`mapreduce::state`]: the task-assignment state machine
//! - [`mapreduce::timeout`]: per-assignment deadlines
//! - [`mapreduce::coordinator`]: listener and per-connection handlers
//! - [`mapreduce::worker`]: the polling worker with fault injection
//! - [`mapreduce::payload`], [`mapreduce::apps`], [`mapreduce::workload`]:
//!   map/reduce execution, applications and synthetic input generation

pub mod mapreduce;

pub use mapreduce::error::{MrError, Result};

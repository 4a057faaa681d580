//! Benchmark harness: run configuration, load-generating invokers, and the
//! per-node coordinator.

mod config;
mod coordinator;
mod invoker;
mod results;

pub use config::{split_workload, BenchConfig};
pub use coordinator::Coordinator;
pub use results::RunResult;

//! Faultline task execution and distributed scheduling engine.
//!
//! The engine turns a declarative [`FaultSpec`] into a tracked, resumable
//! [`Task`]: the fault catalog compiles the spec into command lists, the
//! command runner executes them against an endpoint-bound executor with
//! retries and known-failure classification, the task helper drives the
//! lifecycle state machine, and the cluster-coordinated scheduler fires
//! recurring or deferred faults exactly once across nodes.
//!
//! [`FaultSpec`]: faultline_common::specs::FaultSpec
//! [`Task`]: faultline_common::task::Task

#![forbid(unsafe_code)]

pub mod agent;
pub mod cluster;
pub mod executor;
pub mod fault;
pub mod helper;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod testing;
pub mod tracker;

pub use agent::{AgentController, AgentExecutor};
pub use cluster::{ClusterCoordinator, InMemoryCluster, propagate_node_status};
pub use executor::{CommandExecutor, EndpointClientFactory};
pub use fault::{Fault, FaultRegistry};
pub use helper::TaskHelper;
pub use runner::CommandRunner;
pub use scheduler::{ScheduleDispatcher, Scheduler};
pub use store::{InMemoryTaskStore, TaskStore};

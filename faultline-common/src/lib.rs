//! Shared data model for the Faultline chaos-orchestration engine.
//!
//! Everything here is serialization-friendly state: fault and endpoint
//! specifications, command steps with their retry/classification policy,
//! the task state machine's persistent shape, scheduler records, the
//! error catalog and the engine configuration. Behavior lives in
//! `faultline-engine`; the daemon binary wires both together.

#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod errors;
pub mod specs;
pub mod task;
pub mod types;

pub use errors::{FaultlineError, Result};

//! Faultline daemon.
//!
//! Wires the engine together for a single node: fault registry, task
//! store, endpoint client factory, cluster membership and the scheduler
//! loop, then serves the JSON-line control protocol on a Unix socket.

#![forbid(unsafe_code)]

mod api;
mod events;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use faultline_common::config::FaultlineConfig;
use faultline_common::specs::FaultSpec;
use faultline_common::types::NodeStatus;
use faultline_engine::executor::DefaultEndpointClientFactory;
use faultline_engine::scheduler::ScheduleDispatcher;
use faultline_engine::{
    AgentController, CommandRunner, FaultRegistry, InMemoryCluster, InMemoryTaskStore, Scheduler,
    TaskHelper, propagate_node_status,
};

use events::{DaemonEvent, EventBus};

#[derive(Parser)]
#[command(name = "faultlined")]
#[command(author, version, about = "Faultline daemon - fault orchestration engine")]
struct Cli {
    /// Path to Unix socket
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Shared daemon context passed to all control handlers.
#[derive(Clone)]
pub struct DaemonContext {
    pub helper: Arc<TaskHelper>,
    pub scheduler: Arc<Scheduler>,
    pub events: EventBus,
    pub node_name: String,
    pub socket_path: String,
    pub version: &'static str,
    pub pid: u32,
    pub started_at: Instant,
}

/// Schedule firings become injection tasks run in the background; the
/// scheduler tick never blocks on command execution.
struct TaskDispatcher {
    helper: Arc<TaskHelper>,
    events: EventBus,
}

impl ScheduleDispatcher for TaskDispatcher {
    fn dispatch(&self, schedule_id: &str, spec: &FaultSpec) -> faultline_common::errors::Result<()> {
        let task = self.helper.init_injection(spec.clone())?;
        self.events.emit(&DaemonEvent::ScheduleFired {
            schedule_id: schedule_id.to_string(),
            fault_name: spec.fault_name.clone(),
            endpoint: spec.endpoint.name.clone(),
        });
        let helper = Arc::clone(&self.helper);
        tokio::spawn(async move {
            if let Err(err) = helper.run(&task.id).await {
                warn!(task_id = %task.id, %err, "scheduled injection failed");
            }
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = FaultlineConfig::load(cli.config.as_deref())?;
    let socket_path = cli
        .socket
        .unwrap_or_else(|| PathBuf::from(&config.general.socket_path));

    info!(node = %config.cluster.node_name, "starting faultlined");

    let agent = AgentController::new();
    let helper = Arc::new(TaskHelper::new(
        Arc::new(FaultRegistry::builtin()),
        Arc::new(DefaultEndpointClientFactory::new(Arc::clone(&agent))),
        Arc::new(InMemoryTaskStore::new()),
        CommandRunner::new(&config.engine),
    ));

    let cluster = InMemoryCluster::new();
    let node = Arc::new(cluster.join(config.cluster.node_name.clone()));
    propagate_node_status(
        node.as_ref(),
        NodeStatus::Active,
        Duration::from_millis(config.cluster.convergence_wait_ms),
    )
    .await?;

    let events = EventBus::default();
    let scheduler = Arc::new(Scheduler::new(
        node,
        Arc::new(TaskDispatcher {
            helper: Arc::clone(&helper),
            events: events.clone(),
        }),
    ));
    tokio::spawn(
        Arc::clone(&scheduler).run_loop(Duration::from_secs(config.engine.scheduler_poll_secs)),
    );
    info!(
        poll_secs = config.engine.scheduler_poll_secs,
        "scheduler loop started"
    );

    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "listening");

    let context = DaemonContext {
        helper,
        scheduler,
        events,
        node_name: config.cluster.node_name.clone(),
        socket_path: socket_path.to_string_lossy().to_string(),
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        started_at: Instant::now(),
    };

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let ctx = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = api::handle_connection(stream, ctx).await {
                        warn!(%err, "connection error");
                    }
                });
            }
            Err(err) => {
                warn!(%err, "accept error");
            }
        }
    }
}

#[cfg(test)]
pub fn test_context() -> DaemonContext {
    use faultline_common::config::EngineConfig;

    let agent = AgentController::new();
    let config = EngineConfig {
        default_retry_interval_secs: 0,
        ..EngineConfig::default()
    };
    let helper = Arc::new(TaskHelper::new(
        Arc::new(FaultRegistry::builtin()),
        Arc::new(DefaultEndpointClientFactory::new(agent)),
        Arc::new(InMemoryTaskStore::new()),
        CommandRunner::new(&config),
    ));
    let cluster = InMemoryCluster::new();
    let events = EventBus::default();
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(cluster.join("test-node")),
        Arc::new(TaskDispatcher {
            helper: Arc::clone(&helper),
            events: events.clone(),
        }),
    ));
    DaemonContext {
        helper,
        scheduler,
        events,
        node_name: "test-node".to_string(),
        socket_path: "/tmp/faultlined-test.sock".to_string(),
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        started_at: Instant::now(),
    }
}

//! Common identifier and enum types used across Faultline components.

use serde::{Deserialize, Serialize};

/// Unique identifier for one task (an injection or remediation attempt).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of target a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    /// A plain remote machine reachable over a shell channel.
    Machine,
    /// A container managed by a container engine.
    Container,
    /// An orchestrator-managed resource (pod, node, service, ...).
    Orchestrator,
    /// A managed database proxy.
    DatabaseProxy,
    /// A virtual machine managed by a virtualization platform.
    VirtualMachine,
    /// A cloud provider instance.
    CloudInstance,
    /// A managed process carrying an in-process fault agent.
    Process,
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Machine => "MACHINE",
            Self::Container => "CONTAINER",
            Self::Orchestrator => "ORCHESTRATOR",
            Self::DatabaseProxy => "DATABASE_PROXY",
            Self::VirtualMachine => "VIRTUAL_MACHINE",
            Self::CloudInstance => "CLOUD_INSTANCE",
            Self::Process => "PROCESS",
        };
        write!(f, "{name}")
    }
}

/// Orchestrator resource kinds a fault may further restrict itself to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Pod,
    Node,
    Service,
    Deployment,
}

/// Lifecycle status of one task trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Initializing,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Whether a task injects a fault or remediates an injected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Injection,
    Remediation,
}

/// Scheduler job flavor: recurring cron or one-shot delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type", content = "value")]
pub enum SchedulerJobType {
    /// Standard 5/6-field cron expression.
    Cron(String),
    /// Epoch-millisecond fire time.
    Simple(i64),
}

/// Lifecycle status of a schedule record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerStatus {
    Scheduled,
    Paused,
    Cancelled,
    Finished,
}

/// Operational status a cluster node advertises to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Maintenance => "MAINTENANCE",
        }
    }
}

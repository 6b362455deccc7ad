//! User-supplied fault, endpoint and schedule specifications.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EndpointType, ResourceKind, SchedulerJobType, SchedulerStatus};

/// Reference to already-resolved target credentials.
///
/// The engine never reads credential material itself; it hands the
/// reference to the endpoint client factory, which owns resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRef {
    pub name: String,
}

impl CredentialsRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Description of one fault target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub endpoint_type: EndpointType,
    /// Orchestrator resource kind, when the target is a single resource.
    #[serde(default)]
    pub resource_kind: Option<ResourceKind>,
    /// Member endpoint names, when this endpoint is a group.
    #[serde(default)]
    pub group_members: Vec<String>,
}

impl EndpointSpec {
    pub fn new(name: impl Into<String>, endpoint_type: EndpointType) -> Self {
        Self {
            name: name.into(),
            endpoint_type,
            resource_kind: None,
            group_members: Vec::new(),
        }
    }

    pub fn with_resource_kind(mut self, kind: ResourceKind) -> Self {
        self.resource_kind = Some(kind);
        self
    }

    /// True when this endpoint is `name` or a group containing it.
    pub fn covers(&self, name: &str) -> bool {
        self.name == name || self.group_members.iter().any(|m| m == name)
    }
}

/// Container- and orchestrator-specific sub-arguments of a fault request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerArgs {
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Requested schedule for a fault, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(flatten)]
    pub job_type: SchedulerJobType,
}

/// User-supplied parameters identifying a fault instance and its target.
///
/// Immutable once a task has been created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSpec {
    /// Fault-type key looked up in the registry (e.g. `cpuFault`).
    pub fault_name: String,
    pub endpoint: EndpointSpec,
    pub credentials: CredentialsRef,
    /// Free-form argument map consumed by command templating.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub container_args: Option<ContainerArgs>,
    #[serde(default)]
    pub schedule: Option<ScheduleRequest>,
    /// Dwell time after which a long-lasting fault self-remediates.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl FaultSpec {
    pub fn new(
        fault_name: impl Into<String>,
        endpoint: EndpointSpec,
        credentials: CredentialsRef,
    ) -> Self {
        Self {
            fault_name: fault_name.into(),
            endpoint,
            credentials,
            args: BTreeMap::new(),
            container_args: None,
            schedule: None,
            timeout_ms: None,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_schedule(mut self, job_type: SchedulerJobType) -> Self {
        self.schedule = Some(ScheduleRequest { job_type });
        self
    }
}

/// Persistent record of one scheduled fault.
///
/// Created when a user schedules a fault; mutated by the scheduler on
/// each fire and on resync; cancelled rather than deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub id: String,
    pub job_type: SchedulerJobType,
    pub status: SchedulerStatus,
    pub fault_spec: FaultSpec,
    #[serde(default)]
    pub notifier_names: Vec<String>,
}

impl SchedulerSpec {
    pub fn new(fault_spec: FaultSpec, job_type: SchedulerJobType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            status: SchedulerStatus::Scheduled,
            fault_spec,
            notifier_names: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_endpoint() -> EndpointSpec {
        EndpointSpec::new("web-01", EndpointType::Machine)
    }

    #[test]
    fn group_endpoint_covers_members() {
        let mut group = EndpointSpec::new("web-tier", EndpointType::Machine);
        group.group_members = vec!["web-01".into(), "web-02".into()];
        assert!(group.covers("web-tier"));
        assert!(group.covers("web-02"));
        assert!(!group.covers("db-01"));
    }

    #[test]
    fn fault_spec_serde_round_trip() {
        let spec = FaultSpec::new("cpuFault", machine_endpoint(), CredentialsRef::new("web-creds"))
            .arg("load", "30")
            .arg("timeOutInMilliSeconds", "10000")
            .with_timeout_ms(10_000);
        let json = serde_json::to_string(&spec).unwrap();
        let back: FaultSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn scheduler_spec_starts_scheduled() {
        let spec = FaultSpec::new("cpuFault", machine_endpoint(), CredentialsRef::new("c"));
        let sched = SchedulerSpec::new(spec, SchedulerJobType::Cron("0 0 * * *".into()));
        assert_eq!(sched.status, SchedulerStatus::Scheduled);
        assert!(!sched.id.is_empty());
    }
}

//! The fault contract and the registry of built-in variants.
//!
//! A fault is pure policy: given a [`FaultSpec`] it produces the command
//! lists that inject and remediate it, and declares the endpoint types
//! (and, for orchestrator faults, resource kinds) it can target. Adding a
//! variant never touches the runner or the task machinery.

pub mod agent_faults;
pub mod platform;
pub mod system;

use std::collections::BTreeMap;
use std::sync::Arc;

use faultline_common::command::CommandSpec;
use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::FaultSpec;
use faultline_common::types::{EndpointType, ResourceKind, TaskType};

/// A declarative failure type bound to an endpoint capability set.
pub trait Fault: Send + Sync {
    /// Registry key, e.g. `cpuFault`.
    fn name(&self) -> &'static str;

    fn supported_endpoints(&self) -> &'static [EndpointType];

    /// Orchestrator faults may further restrict target resource kinds.
    /// Empty means no restriction.
    fn supported_resource_kinds(&self) -> &'static [ResourceKind] {
        &[]
    }

    /// Validate the spec against the declared capability set. Runs before
    /// any remote command; failures are never retried.
    fn validate(&self, spec: &FaultSpec) -> Result<()> {
        if !self
            .supported_endpoints()
            .contains(&spec.endpoint.endpoint_type)
        {
            return Err(FaultlineError::with_args(
                ErrorCode::UnsupportedEndpoint,
                [
                    self.name().to_string(),
                    spec.endpoint.endpoint_type.to_string(),
                ],
            ));
        }
        let kinds = self.supported_resource_kinds();
        if !kinds.is_empty() {
            match spec.endpoint.resource_kind {
                Some(kind) if kinds.contains(&kind) => {}
                other => {
                    return Err(FaultlineError::with_args(
                        ErrorCode::UnsupportedResourceKind,
                        [
                            self.name().to_string(),
                            other.map(|k| format!("{k:?}")).unwrap_or_else(|| "NONE".into()),
                        ],
                    ));
                }
            }
        }
        Ok(())
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>>;

    fn remediation_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>>;

    /// Checked before injection or remediation; failures are fatal and
    /// never retried.
    fn prerequisite_commands(&self, _spec: &FaultSpec, _task_type: TaskType) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Run once per target before the first injection attempt.
    fn preparation_commands(&self, _spec: &FaultSpec) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Fault-specific arguments merged into the spec's argument map
    /// before command templating.
    fn specific_args(&self, _spec: &FaultSpec) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn supports_pause(&self) -> bool {
        false
    }

    fn supports_remediation(&self) -> bool {
        true
    }

    /// Long-lasting faults stay active until remediated or until their
    /// timeout elapses.
    fn is_long_lasting(&self, spec: &FaultSpec) -> bool {
        spec.timeout_ms.is_some()
    }

    /// Require an argument, rejecting the request before anything runs.
    fn required_arg<'a>(&self, spec: &'a FaultSpec, key: &str) -> Result<&'a str> {
        spec.args
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| FaultlineError::with_args(ErrorCode::MissingRequiredField, [key]))
    }
}

impl std::fmt::Debug for dyn Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fault").field("name", &self.name()).finish()
    }
}

/// Registry mapping a fault-type key to its implementation.
///
/// Populated at startup (built-ins plus whatever a discovery step hands
/// in); the engine only ever calls through the [`Fault`] trait.
#[derive(Default)]
pub struct FaultRegistry {
    faults: BTreeMap<&'static str, Arc<dyn Fault>>,
}

impl FaultRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry carrying every built-in fault variant.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(system::KillProcessFault));
        registry.register(Arc::new(system::DiskFillFault));
        registry.register(Arc::new(system::DiskIoFault));
        registry.register(Arc::new(agent_faults::CpuFault));
        registry.register(Arc::new(agent_faults::MemoryFault));
        registry.register(Arc::new(platform::ContainerStateFault));
        registry.register(Arc::new(platform::ResourceDeleteFault));
        registry.register(Arc::new(platform::ResourceNotReadyFault));
        registry.register(Arc::new(platform::DbProxyLatencyFault));
        registry.register(Arc::new(platform::VmPowerFault));
        registry.register(Arc::new(platform::CloudInstanceStopFault));
        registry
    }

    pub fn register(&mut self, fault: Arc<dyn Fault>) {
        self.faults.insert(fault.name(), fault);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Fault>> {
        self.faults
            .get(name)
            .cloned()
            .ok_or_else(|| FaultlineError::with_args(ErrorCode::UnsupportedFault, [name]))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.faults.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::specs::{CredentialsRef, EndpointSpec};

    #[test]
    fn builtin_registry_resolves_known_names() {
        let registry = FaultRegistry::builtin();
        assert!(registry.get("cpuFault").is_ok());
        assert!(registry.get("killProcessFault").is_ok());
        assert!(registry.get("diskFillFault").is_ok());
    }

    #[test]
    fn unknown_name_is_unsupported_fault() {
        let registry = FaultRegistry::builtin();
        let err = registry.get("noSuchFault").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFault);
    }

    #[test]
    fn endpoint_type_mismatch_is_rejected() {
        let registry = FaultRegistry::builtin();
        let fault = registry.get("killProcessFault").unwrap();
        let spec = FaultSpec::new(
            "killProcessFault",
            EndpointSpec::new("db-proxy-1", EndpointType::DatabaseProxy),
            CredentialsRef::new("creds"),
        );
        let err = fault.validate(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedEndpoint);
    }

    #[test]
    fn resource_kind_mismatch_has_same_failure_shape() {
        let registry = FaultRegistry::builtin();
        let fault = registry.get("resourceNotReadyFault").unwrap();
        let spec = FaultSpec::new(
            "resourceNotReadyFault",
            EndpointSpec::new("cluster-1", EndpointType::Orchestrator)
                .with_resource_kind(ResourceKind::Pod),
            CredentialsRef::new("creds"),
        );
        let err = fault.validate(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedResourceKind);
    }
}

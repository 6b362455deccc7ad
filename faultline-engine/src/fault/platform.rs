//! Faults targeting managed platforms: container runtimes, orchestrators,
//! database proxies, hypervisors and cloud instances. Each one shells out
//! through the endpoint's control-plane CLI rather than touching the
//! workload directly.

use std::collections::BTreeMap;

use faultline_common::command::CommandSpec;
use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::FaultSpec;
use faultline_common::types::{EndpointType, ResourceKind, TaskType};

use super::Fault;

fn container_name_args(spec: &FaultSpec) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    if !spec.args.contains_key("containerName") {
        if let Some(name) = spec
            .container_args
            .as_ref()
            .and_then(|c| c.container_name.clone())
        {
            args.insert("containerName".to_string(), name);
        }
    }
    args
}

/// Stop a container; remediation starts it again.
pub struct ContainerStateFault;

impl Fault for ContainerStateFault {
    fn name(&self) -> &'static str {
        "containerStateFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Container]
    }

    fn specific_args(&self, spec: &FaultSpec) -> BTreeMap<String, String> {
        container_name_args(spec)
    }

    fn prerequisite_commands(&self, _spec: &FaultSpec, _task_type: TaskType) -> Vec<CommandSpec> {
        vec![
            CommandSpec::builder("docker inspect --format '{{.State.Status}}' $FI_ARG_containerName")
                .known_failure("No such object", "No container found with the provided name")
                .build(),
        ]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        let name_from_container = spec
            .container_args
            .as_ref()
            .is_some_and(|c| c.container_name.is_some());
        if !spec.args.contains_key("containerName") && !name_from_container {
            return Err(FaultlineError::with_args(
                ErrorCode::MissingRequiredField,
                ["containerName"],
            ));
        }
        Ok(vec![
            CommandSpec::builder("docker stop $FI_ARG_containerName")
                .retries(2, 2)
                .known_failure("No such container", "No container found with the provided name")
                .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder("docker start $FI_ARG_containerName")
                .retries(2, 2)
                .known_failure("No such container", "No container found with the provided name")
                .build(),
        ])
    }
}

/// Delete an orchestrator resource. Deletion cannot be undone from here,
/// so the task supports cancel instead of remediation.
pub struct ResourceDeleteFault;

impl Fault for ResourceDeleteFault {
    fn name(&self) -> &'static str {
        "resourceDeleteFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Orchestrator]
    }

    fn supported_resource_kinds(&self) -> &'static [ResourceKind] {
        &[ResourceKind::Pod, ResourceKind::Deployment, ResourceKind::Service]
    }

    fn supports_remediation(&self) -> bool {
        false
    }

    fn is_long_lasting(&self, _spec: &FaultSpec) -> bool {
        false
    }

    fn specific_args(&self, spec: &FaultSpec) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        if let Some(kind) = spec.endpoint.resource_kind {
            args.insert(
                "resourceType".to_string(),
                format!("{kind:?}").to_lowercase(),
            );
        }
        if !spec.args.contains_key("namespace") {
            let namespace = spec
                .container_args
                .as_ref()
                .and_then(|c| c.namespace.clone())
                .unwrap_or_else(|| "default".to_string());
            args.insert("namespace".to_string(), namespace);
        }
        args
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "resourceName")?;
        Ok(vec![
            CommandSpec::builder(
                "kubectl delete $FI_ARG_resourceType $FI_ARG_resourceName -n $FI_ARG_namespace",
            )
            .retries(2, 5)
            .known_success("NotFound")
            .known_failure("Forbidden", "Not authorized to delete the target resource")
            .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Err(FaultlineError::with_args(
            ErrorCode::RemediationNotSupported,
            [self.name()],
        ))
    }
}

/// Cordon an orchestrator node so no new workloads land on it.
pub struct ResourceNotReadyFault;

impl Fault for ResourceNotReadyFault {
    fn name(&self) -> &'static str {
        "resourceNotReadyFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Orchestrator]
    }

    fn supported_resource_kinds(&self) -> &'static [ResourceKind] {
        &[ResourceKind::Node]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "resourceName")?;
        Ok(vec![
            CommandSpec::builder("kubectl cordon $FI_ARG_resourceName")
                .expected_output("cordoned")
                .known_success("already cordoned")
                .known_failure("not found", "No node found with the provided name")
                .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder("kubectl uncordon $FI_ARG_resourceName")
                .expected_output("uncordoned")
                .known_success("already uncordoned")
                .known_failure("not found", "No node found with the provided name")
                .build(),
        ])
    }
}

/// Add a latency toxic on a database proxy listener.
pub struct DbProxyLatencyFault;

impl Fault for DbProxyLatencyFault {
    fn name(&self) -> &'static str {
        "dbProxyLatencyFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::DatabaseProxy]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "proxyName")?;
        self.required_arg(spec, "latencyMs")?;
        Ok(vec![
            CommandSpec::builder(
                "toxiproxy-cli toxic add $FI_ARG_proxyName -t latency \
                 -a latency=$FI_ARG_latencyMs -n faultline-$FI_ARG_taskId",
            )
            .retries(1, 2)
            .known_failure("proxy not found", "No proxy found with the provided name")
            .known_failure("already exists", "A latency toxic from this task is already live")
            .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder(
                "toxiproxy-cli toxic remove $FI_ARG_proxyName -n faultline-$FI_ARG_taskId",
            )
            .known_success("toxic not found")
            .known_failure("proxy not found", "No proxy found with the provided name")
            .build(),
        ])
    }
}

/// Power a virtual machine off; remediation powers it back on.
pub struct VmPowerFault;

impl Fault for VmPowerFault {
    fn name(&self) -> &'static str {
        "vmPowerFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::VirtualMachine]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "vmName")?;
        Ok(vec![
            CommandSpec::builder("govc vm.power -off $FI_ARG_vmName")
                .retries(2, 5)
                .known_success("already powered off")
                .known_failure("not found", "No virtual machine found with the provided name")
                .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder("govc vm.power -on $FI_ARG_vmName")
                .retries(2, 5)
                .known_success("already powered on")
                .known_failure("not found", "No virtual machine found with the provided name")
                .build(),
        ])
    }
}

/// Stop a cloud compute instance; remediation starts it again.
pub struct CloudInstanceStopFault;

impl Fault for CloudInstanceStopFault {
    fn name(&self) -> &'static str {
        "cloudInstanceStopFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::CloudInstance]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "instanceId")?;
        Ok(vec![
            CommandSpec::builder("aws ec2 stop-instances --instance-ids $FI_ARG_instanceId")
                .retries(2, 10)
                .known_failure(
                    "InvalidInstanceID.NotFound",
                    "No instance found with the provided id",
                )
                .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder("aws ec2 start-instances --instance-ids $FI_ARG_instanceId")
                .retries(2, 10)
                .known_failure(
                    "InvalidInstanceID.NotFound",
                    "No instance found with the provided id",
                )
                .known_failure(
                    "IncorrectInstanceState",
                    "Instance is not in a startable state",
                )
                .build(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::specs::{ContainerArgs, CredentialsRef, EndpointSpec};

    #[test]
    fn container_name_falls_back_to_container_args() {
        let mut spec = FaultSpec::new(
            "containerStateFault",
            EndpointSpec::new("docker-01", EndpointType::Container),
            CredentialsRef::new("creds"),
        );
        spec.container_args = Some(ContainerArgs {
            container_name: Some("payments".to_string()),
            ..ContainerArgs::default()
        });
        let args = ContainerStateFault.specific_args(&spec);
        assert_eq!(args.get("containerName").map(String::as_str), Some("payments"));
        assert!(ContainerStateFault.injection_commands(&spec).is_ok());
    }

    #[test]
    fn resource_delete_derives_type_and_namespace() {
        let spec = FaultSpec::new(
            "resourceDeleteFault",
            EndpointSpec::new("cluster-1", EndpointType::Orchestrator)
                .with_resource_kind(ResourceKind::Deployment),
            CredentialsRef::new("creds"),
        )
        .arg("resourceName", "checkout");
        let args = ResourceDeleteFault.specific_args(&spec);
        assert_eq!(args.get("resourceType").map(String::as_str), Some("deployment"));
        assert_eq!(args.get("namespace").map(String::as_str), Some("default"));
    }

    #[test]
    fn resource_delete_cannot_be_remediated() {
        let spec = FaultSpec::new(
            "resourceDeleteFault",
            EndpointSpec::new("cluster-1", EndpointType::Orchestrator)
                .with_resource_kind(ResourceKind::Pod),
            CredentialsRef::new("creds"),
        );
        let err = ResourceDeleteFault.remediation_commands(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemediationNotSupported);
    }

    #[test]
    fn vm_power_off_treats_already_off_as_done() {
        let spec = FaultSpec::new(
            "vmPowerFault",
            EndpointSpec::new("esx-01", EndpointType::VirtualMachine),
            CredentialsRef::new("creds"),
        )
        .arg("vmName", "build-agent-7");
        let commands = VmPowerFault.injection_commands(&spec).unwrap();
        let hit = commands[0]
            .classify_output("govc: vm is already powered off")
            .unwrap();
        assert!(hit.message.is_none());
    }
}

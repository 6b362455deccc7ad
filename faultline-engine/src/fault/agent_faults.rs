//! Faults served by the in-process agent on the target host.
//!
//! The agent speaks a small argv protocol: `-if` installs a fault from
//! key/value pairs, `-llf` lists live long-lasting faults, `-rf` asks
//! one to wind down. Install success carries the agent-side fault id,
//! which the engine extracts and replays on remediation.

use std::collections::BTreeMap;

use faultline_common::command::CommandSpec;
use faultline_common::errors::Result;
use faultline_common::specs::FaultSpec;
use faultline_common::types::EndpointType;

use super::Fault;

pub const INSTALL_SUCCESS_FRAGMENT: &str = "Created Fault Successfully";
pub const REMEDIATION_SUCCESS_FRAGMENT: &str = "Received Remediation Request Successfully";
pub const ALREADY_REMEDIATED_FRAGMENT: &str = "already Remediated";
pub const NO_FAULT_FOUND_FRAGMENT: &str = "No fault found with provided ID";
pub const FAULT_ID_PATTERN: &str = r"Id: ([0-9a-fA-F-]+)";

fn install_command(fault_name: &str, load_arg: &str) -> CommandSpec {
    CommandSpec::builder(format!(
        "-if faultName {fault_name} taskId $FI_ARG_taskId \
         {load_arg} $FI_ARG_{load_arg} \
         timeOutInMilliSeconds $FI_ARG_timeOutInMilliSeconds"
    ))
    .expected_output(INSTALL_SUCCESS_FRAGMENT)
    .extract("faultId", FAULT_ID_PATTERN)
    .retries(1, 2)
    .known_failure(
        "Fault Name is Wrong",
        "The agent does not recognize this fault type",
    )
    .known_failure(
        "is already running",
        "A fault of this type is already live on the target",
    )
    .build()
}

fn remediation_command() -> CommandSpec {
    CommandSpec::builder("-rf $FI_ADD_INFO_faultId")
        .expected_output(REMEDIATION_SUCCESS_FRAGMENT)
        .known_success(ALREADY_REMEDIATED_FRAGMENT)
        .known_success(NO_FAULT_FOUND_FRAGMENT)
        .build()
}

/// Inject default arguments shared by agent faults. The run window comes
/// from the spec-level timeout when the caller did not pass it explicitly.
fn agent_default_args(spec: &FaultSpec) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    if !spec.args.contains_key("timeOutInMilliSeconds") {
        if let Some(timeout_ms) = spec.timeout_ms {
            args.insert("timeOutInMilliSeconds".to_string(), timeout_ms.to_string());
        }
    }
    args
}

/// CPU load fault: the agent burns cores at the requested load for the
/// requested window.
pub struct CpuFault;

impl Fault for CpuFault {
    fn name(&self) -> &'static str {
        "cpuFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Process]
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn is_long_lasting(&self, _spec: &FaultSpec) -> bool {
        true
    }

    fn specific_args(&self, spec: &FaultSpec) -> BTreeMap<String, String> {
        agent_default_args(spec)
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "load")?;
        Ok(vec![install_command(self.name(), "load")])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![remediation_command()])
    }
}

/// Memory pressure fault: the agent holds the requested share of memory
/// for the requested window.
pub struct MemoryFault;

impl Fault for MemoryFault {
    fn name(&self) -> &'static str {
        "memoryFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Process]
    }

    fn is_long_lasting(&self, _spec: &FaultSpec) -> bool {
        true
    }

    fn specific_args(&self, spec: &FaultSpec) -> BTreeMap<String, String> {
        agent_default_args(spec)
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "load")?;
        Ok(vec![install_command(self.name(), "load")])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![remediation_command()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::errors::ErrorCode;
    use faultline_common::specs::{CredentialsRef, EndpointSpec};

    fn cpu_spec() -> FaultSpec {
        FaultSpec::new(
            "cpuFault",
            EndpointSpec::new("svc-01", EndpointType::Process),
            CredentialsRef::new("creds"),
        )
    }

    #[test]
    fn install_command_extracts_fault_id() {
        let spec = cpu_spec().arg("load", "80").arg("timeOutInMilliSeconds", "10000");
        let commands = CpuFault.injection_commands(&spec).unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].command.starts_with("-if faultName cpuFault"));
        assert_eq!(commands[0].output_extraction[0].property_name, "faultId");
        assert_eq!(commands[0].expected_outputs, vec![INSTALL_SUCCESS_FRAGMENT]);
    }

    #[test]
    fn missing_load_is_rejected_before_any_command() {
        let err = CpuFault.injection_commands(&cpu_spec()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
        assert_eq!(err.args, vec!["load".to_string()]);
    }

    #[test]
    fn window_defaults_from_spec_timeout() {
        let spec = cpu_spec().with_timeout_ms(30_000);
        let args = CpuFault.specific_args(&spec);
        assert_eq!(
            args.get("timeOutInMilliSeconds").map(String::as_str),
            Some("30000")
        );
    }

    #[test]
    fn explicit_window_wins_over_spec_timeout() {
        let spec = cpu_spec()
            .arg("timeOutInMilliSeconds", "5000")
            .with_timeout_ms(30_000);
        assert!(CpuFault.specific_args(&spec).is_empty());
    }

    #[test]
    fn already_remediated_output_is_a_clean_end_state() {
        let command = remediation_command();
        let hit = command
            .classify_output("Requested Fault is already Remediated.")
            .unwrap();
        assert!(hit.message.is_none());
    }
}

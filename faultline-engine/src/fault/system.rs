//! Machine-level fault variants: process kill, disk fill, disk I/O load.

use faultline_common::command::CommandSpec;
use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::FaultSpec;
use faultline_common::types::{EndpointType, TaskType};

use super::Fault;

/// Kill a process by id. Not remediable: the process either restarts on
/// its own or stays down, so the task supports cancel instead.
pub struct KillProcessFault;

impl Fault for KillProcessFault {
    fn name(&self) -> &'static str {
        "killProcessFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Machine, EndpointType::Container]
    }

    fn supports_remediation(&self) -> bool {
        false
    }

    fn is_long_lasting(&self, _spec: &FaultSpec) -> bool {
        false
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "processId")?;
        Ok(vec![
            CommandSpec::builder("kill -9 $FI_ARG_processId")
                .retries(2, 2)
                .known_failure(
                    "Operation not permitted",
                    "Kill operation not permitted on the target process",
                )
                .known_failure(
                    "No such process",
                    "No process found with the provided id",
                )
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

/// Fill a directory with a dummy file until remediated.
pub struct DiskFillFault;

impl DiskFillFault {
    fn fill_file() -> &'static str {
        "$FI_ARG_directoryPath/faultline-fill-$FI_ARG_taskId"
    }
}

impl Fault for DiskFillFault {
    fn name(&self) -> &'static str {
        "diskFillFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Machine, EndpointType::Container]
    }

    fn prerequisite_commands(&self, _spec: &FaultSpec, task_type: TaskType) -> Vec<CommandSpec> {
        match task_type {
            TaskType::Injection => vec![CommandSpec::new("df $FI_ARG_directoryPath")],
            TaskType::Remediation => Vec::new(),
        }
    }

    fn preparation_commands(&self, _spec: &FaultSpec) -> Vec<CommandSpec> {
        vec![
            CommandSpec::builder("mkdir -p $FI_ARG_directoryPath")
                .ignore_exit_value_check(true)
                .build(),
        ]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "directoryPath")?;
        self.required_arg(spec, "sizeInMB")?;
        Ok(vec![
            CommandSpec::builder(format!(
                "dd if=/dev/zero of={} bs=1M count=$FI_ARG_sizeInMB",
                Self::fill_file()
            ))
            .retries(2, 5)
            // A full disk is the end state this fault drives toward.
            .known_success("No space left on device")
            .known_failure("Permission denied", "No write permission on the target directory")
            .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder(format!("rm -f {}", Self::fill_file()))
                .retries(2, 2)
                .known_success("No such file or directory")
                .build(),
        ])
    }
}

/// Sustained write load against a target directory.
pub struct DiskIoFault;

impl Fault for DiskIoFault {
    fn name(&self) -> &'static str {
        "diskIOFault"
    }

    fn supported_endpoints(&self) -> &'static [EndpointType] {
        &[EndpointType::Machine]
    }

    fn injection_commands(&self, spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        self.required_arg(spec, "targetDir")?;
        self.required_arg(spec, "blockSizeKB")?;
        Ok(vec![
            CommandSpec::builder(
                "nohup sh -c 'while true; do dd if=/dev/zero \
                 of=$FI_ARG_targetDir/faultline-io-$FI_ARG_taskId \
                 bs=\"$FI_ARG_blockSizeKB\"k count=1024 conv=fsync; done' \
                 >/dev/null 2>&1 & echo started $!",
            )
            .extract("ioPid", r"started (\d+)")
            .known_failure("Permission denied", "No write permission on the target directory")
            .build(),
        ])
    }

    fn remediation_commands(&self, _spec: &FaultSpec) -> Result<Vec<CommandSpec>> {
        Ok(vec![
            CommandSpec::builder("kill -9 $FI_ADD_INFO_ioPid")
                .ignore_exit_value_check(true)
                .known_success("No such process")
                .build(),
            CommandSpec::builder("rm -f $FI_ARG_targetDir/faultline-io-$FI_ARG_taskId")
                .ignore_exit_value_check(true)
                .build(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::specs::{CredentialsRef, EndpointSpec};

    fn spec_for(fault: &str) -> FaultSpec {
        FaultSpec::new(
            fault,
            EndpointSpec::new("web-01", EndpointType::Machine),
            CredentialsRef::new("creds"),
        )
    }

    #[test]
    fn kill_process_requires_process_id() {
        let err = KillProcessFault
            .injection_commands(&spec_for("killProcessFault"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
    }

    #[test]
    fn kill_process_has_no_remediation() {
        assert!(!KillProcessFault.supports_remediation());
        let err = KillProcessFault
            .remediation_commands(&spec_for("killProcessFault"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RemediationNotSupported);
    }

    #[test]
    fn disk_fill_remediation_is_idempotent_by_classification() {
        let commands = DiskFillFault
            .remediation_commands(&spec_for("diskFillFault"))
            .unwrap();
        let hit = commands[0]
            .classify_output("rm: cannot remove: No such file or directory")
            .unwrap();
        assert!(hit.message.is_none());
    }

    #[test]
    fn disk_io_extracts_background_pid() {
        let spec = spec_for("diskIOFault")
            .arg("targetDir", "/tmp")
            .arg("blockSizeKB", "512");
        let commands = DiskIoFault.injection_commands(&spec).unwrap();
        assert_eq!(commands[0].output_extraction[0].property_name, "ioPid");
    }
}

//! Error catalog for Faultline.
//!
//! Each [`ErrorCode`] maps to a unique `FLN-Exxx` code, a message
//! template with positional `{n}` placeholders, and remediation hints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all Faultline error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Validation Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Fault name not present in the registry
    UnsupportedFault,
    /// Fault does not support the target endpoint type
    UnsupportedEndpoint,
    /// Fault does not support the target resource kind
    UnsupportedResourceKind,
    /// Required fault argument is missing
    MissingRequiredField,

    // =========================================================================
    // Command Execution Errors (E100-E199)
    // =========================================================================
    /// Command failed after exhausting its retry budget
    CommandExecutionFailed,
    /// Command output matched a classified known failure
    CommandKnownFailure,
    /// Command template still holds an unresolved placeholder
    MissingReferenceValue,
    /// Output-extraction rule produced no value
    OutputExtractionFailed,
    /// No executor available for the target endpoint
    ExecutorUnavailable,
    /// Command exceeded its per-attempt timeout
    CommandTimeout,

    // =========================================================================
    // Task Errors (E200-E299)
    // =========================================================================
    /// Task execution failed (wraps unexpected causes)
    TaskExecutionFailed,
    /// Target already has an active task
    ConcurrentExecutionNotSupported,
    /// No task with the given id
    TaskNotFound,
    /// Task used before init
    TaskNotInitialized,
    /// Fault does not declare pause support
    PauseNotSupported,
    /// Cancel is only defined for non-remediable faults
    CancelNotSupported,
    /// Fault has no remediation commands
    RemediationNotSupported,
    /// Injected fault was already remediated
    TaskAlreadyRemediated,
    /// Operation invalid for the task's current status
    InvalidTaskState,

    // =========================================================================
    // Scheduler Errors (E300-E399)
    // =========================================================================
    /// No schedule with the given id
    ScheduleNotFound,
    /// Resume called on a schedule that is not paused
    ScheduleNotPaused,
    /// Cron expression failed to parse
    InvalidCronExpression,
    /// Schedule resynchronization failed
    ResyncFailed,
    /// Pause called on a schedule that is not actively scheduled
    ScheduleNotActive,

    // =========================================================================
    // Cluster Errors (E400-E499)
    // =========================================================================
    /// Node status did not converge within the wait budget
    ClusterConvergenceTimeout,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Unexpected internal state
    InternalStateError,
    /// Serialization/deserialization error
    InternalSerdeError,
    /// Daemon socket connection failed
    InternalDaemonSocket,
    /// Daemon protocol error
    InternalDaemonProtocol,
}

/// High-level category derived from the code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Command,
    Task,
    Scheduler,
    Cluster,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Command => "command",
            Self::Task => "task",
            Self::Scheduler => "scheduler",
            Self::Cluster => "cluster",
            Self::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Validation (001-099)
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigValidationError => 4,
            Self::UnsupportedFault => 10,
            Self::UnsupportedEndpoint => 11,
            Self::UnsupportedResourceKind => 12,
            Self::MissingRequiredField => 13,

            // Command (100-199)
            Self::CommandExecutionFailed => 100,
            Self::CommandKnownFailure => 101,
            Self::MissingReferenceValue => 102,
            Self::OutputExtractionFailed => 103,
            Self::ExecutorUnavailable => 104,
            Self::CommandTimeout => 105,

            // Task (200-299)
            Self::TaskExecutionFailed => 200,
            Self::ConcurrentExecutionNotSupported => 201,
            Self::TaskNotFound => 202,
            Self::TaskNotInitialized => 203,
            Self::PauseNotSupported => 204,
            Self::CancelNotSupported => 205,
            Self::RemediationNotSupported => 206,
            Self::TaskAlreadyRemediated => 207,
            Self::InvalidTaskState => 208,

            // Scheduler (300-399)
            Self::ScheduleNotFound => 302,
            Self::ScheduleNotPaused => 303,
            Self::InvalidCronExpression => 304,
            Self::ResyncFailed => 305,
            Self::ScheduleNotActive => 306,

            // Cluster (400-499)
            Self::ClusterConvergenceTimeout => 400,

            // Internal (500-599)
            Self::InternalStateError => 500,
            Self::InternalSerdeError => 501,
            Self::InternalDaemonSocket => 502,
            Self::InternalDaemonProtocol => 503,
        }
    }

    /// Returns the formatted error code string (e.g., "FLN-E011").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("FLN-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Validation,
            100..=199 => ErrorCategory::Command,
            200..=299 => ErrorCategory::Task,
            300..=399 => ErrorCategory::Scheduler,
            400..=499 => ErrorCategory::Cluster,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the message template. Positional `{n}` placeholders are
    /// filled from the error's argument list.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            // Validation
            Self::ConfigNotFound => "Configuration file not found at '{0}'",
            Self::ConfigReadError => "Failed to read configuration file '{0}'",
            Self::ConfigParseError => "Configuration file contains invalid TOML: {0}",
            Self::ConfigValidationError => "Configuration contains invalid values: {0}",
            Self::UnsupportedFault => "No fault registered under the name '{0}'",
            Self::UnsupportedEndpoint => {
                "Fault '{0}' does not support endpoint type '{1}'"
            }
            Self::UnsupportedResourceKind => {
                "Fault '{0}' does not support resource kind '{1}'"
            }
            Self::MissingRequiredField => "Required fault argument '{0}' is missing",

            // Command
            Self::CommandExecutionFailed => {
                "Command '{0}' failed with exit code {1}. Output: {2}"
            }
            Self::CommandKnownFailure => "{0}",
            Self::MissingReferenceValue => {
                "Command '{0}' holds an unresolved placeholder after substitution"
            }
            Self::OutputExtractionFailed => {
                "Failed to extract property '{0}' from command output"
            }
            Self::ExecutorUnavailable => "No command executor available for endpoint '{0}'",
            Self::CommandTimeout => "Command '{0}' exceeded its timeout of {1} ms",

            // Task
            Self::TaskExecutionFailed => "Task execution failed: {0}",
            Self::ConcurrentExecutionNotSupported => {
                "Endpoint '{0}' already has an active task ({1}); concurrent execution is not supported"
            }
            Self::TaskNotFound => "No task found with id '{0}'",
            Self::TaskNotInitialized => "Task '{0}' has not been initialized",
            Self::PauseNotSupported => "Fault '{0}' does not support pause/resume",
            Self::CancelNotSupported => {
                "Fault '{0}' supports remediation; cancel is only defined for non-remediable faults"
            }
            Self::RemediationNotSupported => "Fault '{0}' does not support remediation",
            Self::TaskAlreadyRemediated => "Fault of task '{0}' is already remediated",
            Self::InvalidTaskState => "Operation '{0}' is invalid while task '{1}' is {2}",

            // Scheduler
            Self::ScheduleNotFound => "No schedule found with id '{0}'",
            Self::ScheduleNotPaused => "Schedule '{0}' is not in a paused state",
            Self::InvalidCronExpression => "Cron expression '{0}' is invalid: {1}",
            Self::ResyncFailed => "Failed to resynchronize schedule '{0}'",
            Self::ScheduleNotActive => "Schedule '{0}' is not in a scheduled state",

            // Cluster
            Self::ClusterConvergenceTimeout => {
                "Node status '{0}' did not propagate to all members within {1} ms"
            }

            // Internal
            Self::InternalStateError => "Unexpected internal state: {0}",
            Self::InternalSerdeError => "Serialization error: {0}",
            Self::InternalDaemonSocket => "Failed to connect to daemon socket at '{0}'",
            Self::InternalDaemonProtocol => "Daemon protocol error: {0}",
        }
    }

    /// Returns remediation hints for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Pass --config with an explicit path",
                "Create ~/.config/faultline/faultline.toml",
            ],
            Self::ConfigReadError => &[
                "Check file permissions on the configuration file",
                "Verify the file is not corrupted",
            ],
            Self::ConfigParseError => &[
                "Check TOML syntax at the indicated line",
                "Ensure all strings are properly quoted",
            ],
            Self::ConfigValidationError => &[
                "Check that all required fields are present",
                "Verify values are within allowed ranges",
            ],
            Self::UnsupportedFault => &[
                "List registered faults to check the spelling",
                "Ensure the plugin providing the fault was loaded at startup",
            ],
            Self::UnsupportedEndpoint => &[
                "Check the fault's declared endpoint capability set",
                "Target an endpoint of a supported type",
            ],
            Self::UnsupportedResourceKind => &[
                "Check the resource kinds the fault declares",
                "Target a supported orchestrator resource",
            ],
            Self::MissingRequiredField => &[
                "Add the missing argument to the fault request",
            ],
            Self::CommandExecutionFailed => &[
                "Inspect the attached command output",
                "Verify the target endpoint is reachable and healthy",
                "Increase the retry budget for flaky targets",
            ],
            Self::CommandKnownFailure => &[
                "The output matched a classified failure; see the message",
            ],
            Self::MissingReferenceValue => &[
                "Check that earlier steps extracted the referenced property",
                "Verify the fault's argument map covers all $FI_ARG_ references",
            ],
            Self::OutputExtractionFailed => &[
                "Check the extraction regex against the actual command output",
            ],
            Self::ExecutorUnavailable => &[
                "Register an endpoint client for the target's type",
                "Verify the endpoint credentials reference resolves",
            ],
            Self::CommandTimeout => &[
                "Increase the command's timeout",
                "Check target load and connectivity",
            ],
            Self::TaskExecutionFailed => &[
                "Inspect the task's activity log for the failing step",
            ],
            Self::ConcurrentExecutionNotSupported => &[
                "Wait for the active task to finish or remediate it",
                "Target a different endpoint",
            ],
            Self::TaskNotFound => &["Check the task id for typos"],
            Self::TaskNotInitialized => &["Call init before running the task"],
            Self::PauseNotSupported => &[
                "Only faults declaring pause support can be paused",
            ],
            Self::CancelNotSupported => &[
                "Remediate the fault instead of cancelling it",
            ],
            Self::RemediationNotSupported => &[
                "The fault ends on its own or via cancel",
            ],
            Self::TaskAlreadyRemediated => &[
                "No action needed; the fault is already clean",
            ],
            Self::InvalidTaskState => &[
                "Check the task's current status before retrying",
            ],
            Self::ScheduleNotFound => &["List active schedules to check the id"],
            Self::ScheduleNotPaused => &["Only paused schedules can be resumed"],
            Self::ScheduleNotActive => &["Only scheduled (active) schedules can be paused"],
            Self::InvalidCronExpression => &[
                "Use standard 5/6-field cron syntax",
            ],
            Self::ResyncFailed => &[
                "Retry the resync once membership stabilizes",
            ],
            Self::ClusterConvergenceTimeout => &[
                "Check connectivity between cluster members",
                "Retry the operation once the partition heals",
            ],
            Self::InternalStateError
            | Self::InternalSerdeError
            | Self::InternalDaemonSocket
            | Self::InternalDaemonProtocol => &[
                "Check daemon logs for details",
                "Report this as a bug if it persists",
            ],
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// A complete catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "FLN-E201")
    pub code: String,
    pub category: ErrorCategory,
    /// Message template with positional placeholders
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

//! Declarative description of one remote command step.
//!
//! A fault compiles down to an ordered list of [`CommandSpec`]s. Each spec
//! carries everything the runner needs to execute the step unattended:
//! the command template, the retry budget, the success predicate, the
//! output-extraction rules and the known-failure classification table.

use serde::{Deserialize, Serialize};

/// Placeholder prefix resolved from the fault's argument map.
pub const ARG_PREFIX: &str = "$FI_ARG_";
/// Placeholder prefix resolved from properties extracted by earlier steps.
pub const PROPERTY_PREFIX: &str = "$FI_ADD_INFO_";
/// Placeholder replaced with the previous step's trimmed output.
pub const STACK_MARKER: &str = "$FI_STACK";

/// Rule extracting a named property from a step's output via a regex.
///
/// A `None` regex captures the whole output. The first capture group wins
/// when the regex declares one, otherwise the full match is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputExtractionRule {
    pub property_name: String,
    #[serde(default)]
    pub regex: Option<String>,
}

/// One entry of the known-failure classification table.
///
/// `message: None` means the observed output describes the desired end
/// state already (idempotent no-op, treated as success). `Some(msg)`
/// translates the step outcome into that specific user-facing error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFailure {
    /// Case-insensitive substring matched against the raw output.
    pub pattern: String,
    pub message: Option<String>,
}

/// Declarative description of one retried, failure-classified command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command template; may reference `$FI_ARG_`, `$FI_ADD_INFO_` and
    /// `$FI_STACK` placeholders.
    pub command: String,
    /// Accept any exit code and rely on output checks alone.
    #[serde(default)]
    pub ignore_exit_value_check: bool,
    /// Substrings of which at least one must appear in the output.
    /// Empty means the exit code alone decides.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Additional attempts after the initial one.
    #[serde(default)]
    pub no_of_retries: u32,
    /// Seconds slept between attempts.
    #[serde(default)]
    pub retry_interval_secs: u64,
    /// Per-attempt timeout in milliseconds; `None` uses the engine default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub output_extraction: Vec<OutputExtractionRule>,
    /// Ordered classification table; first matching entry wins.
    #[serde(default)]
    pub known_failures: Vec<KnownFailure>,
}

impl CommandSpec {
    /// Start building a spec from its command template.
    pub fn builder(command: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder {
            spec: CommandSpec::new(command),
        }
    }

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ignore_exit_value_check: false,
            expected_outputs: Vec::new(),
            no_of_retries: 0,
            retry_interval_secs: 0,
            timeout_ms: None,
            output_extraction: Vec::new(),
            known_failures: Vec::new(),
        }
    }

    /// Look up the first known-failure entry whose pattern occurs in
    /// `output` (case-insensitive).
    pub fn classify_output<'a>(&'a self, output: &str) -> Option<&'a KnownFailure> {
        let lowered = output.to_lowercase();
        self.known_failures
            .iter()
            .filter(|entry| !entry.pattern.is_empty())
            .find(|entry| lowered.contains(&entry.pattern.to_lowercase()))
    }
}

/// Fluent builder mirroring how fault helpers assemble command lists.
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    pub fn ignore_exit_value_check(mut self, ignore: bool) -> Self {
        self.spec.ignore_exit_value_check = ignore;
        self
    }

    pub fn expected_output(mut self, fragment: impl Into<String>) -> Self {
        self.spec.expected_outputs.push(fragment.into());
        self
    }

    pub fn retries(mut self, count: u32, interval_secs: u64) -> Self {
        self.spec.no_of_retries = count;
        self.spec.retry_interval_secs = interval_secs;
        self
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.spec.timeout_ms = Some(timeout);
        self
    }

    pub fn extract(mut self, property_name: impl Into<String>, regex: impl Into<String>) -> Self {
        self.spec.output_extraction.push(OutputExtractionRule {
            property_name: property_name.into(),
            regex: Some(regex.into()),
        });
        self
    }

    pub fn extract_full_output(mut self, property_name: impl Into<String>) -> Self {
        self.spec.output_extraction.push(OutputExtractionRule {
            property_name: property_name.into(),
            regex: None,
        });
        self
    }

    /// Classify an observed output fragment as an idempotent no-op.
    pub fn known_success(mut self, pattern: impl Into<String>) -> Self {
        self.spec.known_failures.push(KnownFailure {
            pattern: pattern.into(),
            message: None,
        });
        self
    }

    /// Classify an observed output fragment as a specific user-facing error.
    pub fn known_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.spec.known_failures.push(KnownFailure {
            pattern: pattern.into(),
            message: Some(message.into()),
        });
        self
    }

    pub fn build(self) -> CommandSpec {
        self.spec
    }
}

/// Raw outcome of one executor invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandExecutionResult {
    pub exit_code: i32,
    pub output: String,
}

impl CommandExecutionResult {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_full_spec() {
        let spec = CommandSpec::builder("kill -9 $FI_ARG_processId")
            .retries(2, 1)
            .expected_output("")
            .known_success("no such process")
            .known_failure("Operation not permitted", "Kill operation not permitted")
            .build();
        assert_eq!(spec.no_of_retries, 2);
        assert_eq!(spec.retry_interval_secs, 1);
        assert_eq!(spec.known_failures.len(), 2);
        assert!(spec.known_failures[0].message.is_none());
    }

    #[test]
    fn classify_output_is_case_insensitive_and_ordered() {
        let spec = CommandSpec::builder("true")
            .known_success("Already Remediated")
            .known_failure("permission denied", "No permission")
            .build();
        let hit = spec.classify_output("requested fault is ALREADY remediated.");
        assert!(hit.is_some());
        assert!(hit.unwrap().message.is_none());
        let hit = spec.classify_output("sh: permission DENIED");
        assert_eq!(hit.unwrap().message.as_deref(), Some("No permission"));
        assert!(spec.classify_output("something else").is_none());
    }

    #[test]
    fn classify_output_skips_empty_patterns() {
        let spec = CommandSpec::builder("true").known_success("").build();
        assert!(spec.classify_output("any output").is_none());
    }
}

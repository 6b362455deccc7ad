//! Executes an ordered list of command specs with retries and
//! known-failure translation.
//!
//! Remote commands are unreliable and their failure text is often the
//! only signal available. The known-failure table turns ad hoc string
//! matching into declared policy: an observed output mapped to no
//! message means the target is already in the desired end state, an
//! output mapped to a message becomes that specific user-facing error,
//! and anything else is a transient failure worth a retry.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use faultline_common::command::{
    ARG_PREFIX, CommandExecutionResult, CommandSpec, PROPERTY_PREFIX, STACK_MARKER,
};
use faultline_common::config::EngineConfig;
use faultline_common::errors::{ErrorCode, FaultlineError, Result};

use crate::executor::CommandExecutor;

/// Outcome of one attempt, before the retry policy is applied.
enum Attempt {
    Success(CommandExecutionResult),
    /// Output matched a known-failure entry with no message: the target
    /// is already in the desired end state.
    AlreadyInEndState(CommandExecutionResult),
    /// Output matched a known-failure entry carrying a message; never
    /// retried.
    Classified(FaultlineError),
    Transient(CommandExecutionResult),
    /// The attempt hit its per-attempt timeout; retried like a transient
    /// failure but reported distinctly when it is the last one standing.
    TimedOut(Duration),
}

/// Runs command lists against one executor, fail-fast on the first
/// unrecoverable step.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    default_retry_interval_secs: u64,
    default_timeout_ms: u64,
}

impl CommandRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_retry_interval_secs: config.default_retry_interval_secs,
            default_timeout_ms: config.default_command_timeout_ms,
        }
    }

    /// Execute `specs` in order. Properties extracted by earlier steps
    /// are merged into `properties` and visible to later templates; the
    /// previous step's trimmed output backs the `$FI_STACK` marker.
    pub async fn execute(
        &self,
        executor: &dyn CommandExecutor,
        specs: &[CommandSpec],
        args: &BTreeMap<String, String>,
        properties: &mut BTreeMap<String, String>,
    ) -> Result<Vec<CommandExecutionResult>> {
        let mut results = Vec::with_capacity(specs.len());
        let mut last_output: Option<String> = None;
        for spec in specs {
            let rendered = render_command(&spec.command, args, properties, last_output.as_deref())?;
            let result = self.execute_retriable(executor, spec, &rendered).await?;
            extract_properties(spec, &result.output, properties)?;
            last_output = Some(result.output.trim().to_string());
            results.push(result);
        }
        Ok(results)
    }

    async fn execute_retriable(
        &self,
        executor: &dyn CommandExecutor,
        spec: &CommandSpec,
        rendered: &str,
    ) -> Result<CommandExecutionResult> {
        let attempts = spec.no_of_retries.saturating_add(1);
        let interval = if spec.retry_interval_secs > 0 {
            spec.retry_interval_secs
        } else {
            self.default_retry_interval_secs
        };
        let mut last = CommandExecutionResult::default();
        let mut last_timeout = None;
        for attempt in 1..=attempts {
            match self.execute_once(executor, spec, rendered).await {
                Attempt::Success(result) | Attempt::AlreadyInEndState(result) => {
                    return Ok(result);
                }
                Attempt::Classified(err) => return Err(err),
                Attempt::Transient(result) => {
                    warn!(
                        command = %rendered,
                        attempt,
                        attempts,
                        exit_code = result.exit_code,
                        "command attempt failed"
                    );
                    last = result;
                    last_timeout = None;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(interval)).await;
                    }
                }
                Attempt::TimedOut(timeout) => {
                    warn!(
                        command = %rendered,
                        attempt,
                        attempts,
                        timeout_ms = timeout.as_millis() as u64,
                        "command attempt timed out"
                    );
                    last_timeout = Some(timeout);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(interval)).await;
                    }
                }
            }
        }
        if let Some(timeout) = last_timeout {
            return Err(FaultlineError::with_args(
                ErrorCode::CommandTimeout,
                [rendered.to_string(), timeout.as_millis().to_string()],
            ));
        }
        Err(FaultlineError::with_args(
            ErrorCode::CommandExecutionFailed,
            [
                rendered.to_string(),
                last.exit_code.to_string(),
                last.output.clone(),
            ],
        ))
    }

    async fn execute_once(
        &self,
        executor: &dyn CommandExecutor,
        spec: &CommandSpec,
        rendered: &str,
    ) -> Attempt {
        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(self.default_timeout_ms));
        let result = match tokio::time::timeout(timeout, executor.run(rendered)).await {
            Ok(Ok(result)) => result,
            // Transport errors surface through the same classification
            // path as command failures; the known-failure table may
            // recognize them.
            Ok(Err(err)) => CommandExecutionResult::new(-1, err.message()),
            Err(_) => return Attempt::TimedOut(timeout),
        };
        debug!(command = %rendered, exit_code = result.exit_code, "command finished");

        let exit_ok = spec.ignore_exit_value_check || result.exit_code == 0;
        let output_ok = spec.expected_outputs.is_empty()
            || spec
                .expected_outputs
                .iter()
                .any(|expected| result.output.contains(expected));
        if exit_ok && output_ok {
            return Attempt::Success(result);
        }

        // Primary success check failed; consult the classification table.
        match spec.classify_output(&result.output) {
            Some(entry) => match &entry.message {
                None => Attempt::AlreadyInEndState(result),
                Some(message) => Attempt::Classified(FaultlineError::with_args(
                    ErrorCode::CommandKnownFailure,
                    [message.clone()],
                )),
            },
            None => Attempt::Transient(result),
        }
    }
}

/// Substitute `$FI_ARG_`, `$FI_ADD_INFO_` and `$FI_STACK` references.
/// Any marker left after substitution is a missing reference, rejected
/// before the command runs.
fn render_command(
    template: &str,
    args: &BTreeMap<String, String>,
    properties: &BTreeMap<String, String>,
    last_output: Option<&str>,
) -> Result<String> {
    let mut command = template.to_string();
    // Longest keys first, so a key that is a prefix of another (taskId
    // vs task) never clobbers the longer reference.
    let mut arg_keys: Vec<&String> = args.keys().collect();
    arg_keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    for key in arg_keys {
        command = command.replace(&format!("{ARG_PREFIX}{key}"), &args[key]);
    }
    let mut property_keys: Vec<&String> = properties.keys().collect();
    property_keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    for key in property_keys {
        command = command.replace(&format!("{PROPERTY_PREFIX}{key}"), &properties[key]);
    }
    if command.contains(STACK_MARKER) {
        if let Some(output) = last_output {
            command = command.replace(STACK_MARKER, output);
        }
    }
    if command.contains(ARG_PREFIX)
        || command.contains(PROPERTY_PREFIX)
        || command.contains(STACK_MARKER)
    {
        return Err(FaultlineError::with_args(
            ErrorCode::MissingReferenceValue,
            [command],
        ));
    }
    Ok(command)
}

/// Run the spec's extraction rules over `output`, merging named
/// properties into the shared map. An empty extraction is an error: a
/// later step would render an unresolved placeholder otherwise.
fn extract_properties(
    spec: &CommandSpec,
    output: &str,
    properties: &mut BTreeMap<String, String>,
) -> Result<()> {
    for rule in &spec.output_extraction {
        let value = match &rule.regex {
            None => output.trim().to_string(),
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|_| {
                    FaultlineError::with_args(
                        ErrorCode::OutputExtractionFailed,
                        [rule.property_name.clone()],
                    )
                })?;
                match regex.captures(output) {
                    Some(caps) => caps
                        .get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    None => String::new(),
                }
            }
        };
        if value.is_empty() {
            return Err(FaultlineError::with_args(
                ErrorCode::OutputExtractionFailed,
                [rule.property_name.clone()],
            ));
        }
        properties.insert(rule.property_name.clone(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use faultline_common::command::CommandSpec;

    fn runner() -> CommandRunner {
        CommandRunner::new(&EngineConfig {
            default_retry_interval_secs: 0,
            default_command_timeout_ms: 5_000,
            scheduler_poll_secs: 1,
        })
    }

    fn no_args() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[tokio::test]
    async fn successful_run_collects_results_in_order() {
        let executor = ScriptedExecutor::new("t")
            .respond("step-one", 0, "one done")
            .respond("step-two", 0, "two done");
        let specs = vec![CommandSpec::new("step-one"), CommandSpec::new("step-two")];
        let mut props = BTreeMap::new();
        let results = runner()
            .execute(&executor, &specs, &no_args(), &mut props)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].output, "two done");
    }

    #[tokio::test]
    async fn retry_budget_is_initial_plus_retries() {
        let executor = ScriptedExecutor::new("t").always_fail(1, "boom");
        let spec = CommandSpec::builder("flaky").retries(2, 0).build();
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandExecutionFailed);
        assert_eq!(executor.invocations(), 3);
        assert!(err.message().contains("boom"));
    }

    #[tokio::test]
    async fn retry_sleeps_between_attempts() {
        let executor = ScriptedExecutor::new("t").always_fail(1, "boom");
        let spec = CommandSpec::builder("flaky").retries(2, 1).build();
        let mut props = BTreeMap::new();
        let started = std::time::Instant::now();
        let _ = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(executor.invocations(), 3);
    }

    #[tokio::test]
    async fn known_success_short_circuits_without_consuming_retries() {
        let executor = ScriptedExecutor::new("t").always_fail(1, "fault already remediated");
        let spec = CommandSpec::builder("remediate")
            .retries(5, 10)
            .known_success("already remediated")
            .build();
        let mut props = BTreeMap::new();
        let results = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(executor.invocations(), 1);
    }

    #[tokio::test]
    async fn known_failure_translates_without_retrying() {
        let executor = ScriptedExecutor::new("t").always_fail(1, "Operation not permitted");
        let spec = CommandSpec::builder("kill")
            .retries(5, 10)
            .known_failure("operation not permitted", "Kill operation not permitted")
            .build();
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandKnownFailure);
        assert_eq!(err.message(), "Kill operation not permitted");
        assert_eq!(executor.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_command_surfaces_as_timeout() {
        struct HangingExecutor;

        #[async_trait::async_trait]
        impl crate::executor::CommandExecutor for HangingExecutor {
            async fn run(&self, _command: &str) -> Result<CommandExecutionResult> {
                std::future::pending().await
            }

            fn target(&self) -> String {
                "t".to_string()
            }
        }

        let spec = CommandSpec::builder("hang").timeout_ms(250).retries(1, 0).build();
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&HangingExecutor, &[spec], &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandTimeout);
        assert!(err.message().contains("250 ms"));
    }

    #[tokio::test]
    async fn expected_output_mismatch_is_transient() {
        let executor = ScriptedExecutor::new("t").respond("check", 0, "not what we want");
        let spec = CommandSpec::builder("check")
            .expected_output("all good")
            .build();
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandExecutionFailed);
    }

    #[tokio::test]
    async fn ignore_exit_value_check_accepts_nonzero() {
        let executor = ScriptedExecutor::new("t").respond("cleanup", 1, "removed");
        let spec = CommandSpec::builder("cleanup")
            .ignore_exit_value_check(true)
            .build();
        let mut props = BTreeMap::new();
        let results = runner()
            .execute(&executor, &[spec], &no_args(), &mut props)
            .await
            .unwrap();
        assert_eq!(results[0].exit_code, 1);
    }

    #[tokio::test]
    async fn arg_and_property_substitution_chain() {
        let executor = ScriptedExecutor::new("t")
            .respond("start worker-7", 0, "started with pid 4242")
            .respond("check 4242", 0, "alive");
        let mut args = BTreeMap::new();
        args.insert("workerName".to_string(), "worker-7".to_string());
        let specs = vec![
            CommandSpec::builder("start $FI_ARG_workerName")
                .extract("pid", r"pid (\d+)")
                .build(),
            CommandSpec::new("check $FI_ADD_INFO_pid"),
        ];
        let mut props = BTreeMap::new();
        runner()
            .execute(&executor, &specs, &args, &mut props)
            .await
            .unwrap();
        assert_eq!(props.get("pid").map(String::as_str), Some("4242"));
    }

    #[tokio::test]
    async fn stack_marker_uses_previous_output() {
        let executor = ScriptedExecutor::new("t")
            .respond("whoami", 0, "root\n")
            .respond("echo root", 0, "root");
        let specs = vec![CommandSpec::new("whoami"), CommandSpec::new("echo $FI_STACK")];
        let mut props = BTreeMap::new();
        runner()
            .execute(&executor, &specs, &no_args(), &mut props)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unresolved_reference_fails_before_running() {
        let executor = ScriptedExecutor::new("t");
        let specs = vec![CommandSpec::new("kill $FI_ARG_processId")];
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &specs, &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingReferenceValue);
        assert_eq!(executor.invocations(), 0);
    }

    #[tokio::test]
    async fn failed_extraction_is_an_error() {
        let executor = ScriptedExecutor::new("t").respond("start", 0, "no pid here");
        let specs = vec![
            CommandSpec::builder("start")
                .extract("pid", r"pid (\d+)")
                .build(),
        ];
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &specs, &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::OutputExtractionFailed);
    }

    #[tokio::test]
    async fn fails_fast_on_first_unrecoverable_step() {
        let executor = ScriptedExecutor::new("t")
            .respond("one", 1, "broken")
            .respond("two", 0, "never runs");
        let specs = vec![CommandSpec::new("one"), CommandSpec::new("two")];
        let mut props = BTreeMap::new();
        let err = runner()
            .execute(&executor, &specs, &no_args(), &mut props)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandExecutionFailed);
        assert_eq!(executor.invocations(), 1);
    }
}

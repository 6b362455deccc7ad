//! Command execution seam between the engine and its targets.
//!
//! A [`CommandExecutor`] is bound to exactly one target (a machine shell,
//! a container exec channel, an in-process agent). The engine only ever
//! sees the `run` capability; endpoint-specific transports live behind
//! the [`EndpointClientFactory`].

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use faultline_common::command::CommandExecutionResult;
use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::{CredentialsRef, EndpointSpec};
use faultline_common::types::EndpointType;

/// Capability to run one command against one target.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandExecutionResult>;

    /// Short human-readable target description for activity logs.
    fn target(&self) -> String;
}

/// Hands out executors keyed by endpoint type.
///
/// Credentials arrive as already-resolved references; resolution is the
/// factory's concern, never the engine's.
#[async_trait]
pub trait EndpointClientFactory: Send + Sync {
    async fn executor(
        &self,
        credentials: &CredentialsRef,
        endpoint: &EndpointSpec,
    ) -> Result<Arc<dyn CommandExecutor>>;
}

/// Executor running commands through the local shell.
///
/// Used for machine endpoints reachable from this node and as the
/// building block container/orchestrator transports wrap their CLI
/// invocations in.
pub struct ProcessExecutor {
    target_name: String,
    shell: String,
}

impl ProcessExecutor {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            shell: "/bin/sh".to_string(),
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: &str) -> Result<CommandExecutionResult> {
        debug!(target_name = %self.target_name, %command, "running shell command");
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                FaultlineError::with_args(ErrorCode::ExecutorUnavailable, [e.to_string()])
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandExecutionResult::new(
            output.status.code().unwrap_or(-1),
            combined.trim().to_string(),
        ))
    }

    fn target(&self) -> String {
        self.target_name.clone()
    }
}

/// Default factory: machine endpoints get a local shell executor,
/// process endpoints get the in-process agent channel. Every other
/// endpoint type needs a dedicated client registered by the host.
pub struct DefaultEndpointClientFactory {
    agent: Arc<crate::agent::AgentController>,
}

impl DefaultEndpointClientFactory {
    pub fn new(agent: Arc<crate::agent::AgentController>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl EndpointClientFactory for DefaultEndpointClientFactory {
    async fn executor(
        &self,
        _credentials: &CredentialsRef,
        endpoint: &EndpointSpec,
    ) -> Result<Arc<dyn CommandExecutor>> {
        match endpoint.endpoint_type {
            EndpointType::Machine => {
                Ok(Arc::new(ProcessExecutor::new(endpoint.name.clone())) as Arc<dyn CommandExecutor>)
            }
            EndpointType::Process => Ok(Arc::new(crate::agent::AgentExecutor::new(
                endpoint.name.clone(),
                Arc::clone(&self.agent),
            )) as Arc<dyn CommandExecutor>),
            _ => Err(FaultlineError::with_args(
                ErrorCode::ExecutorUnavailable,
                [endpoint.name.clone()],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_executor_captures_exit_code_and_output() {
        let executor = ProcessExecutor::new("local");
        let result = executor.run("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hello");

        let result = executor.run("exit 3").await.unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn process_executor_merges_stderr() {
        let executor = ProcessExecutor::new("local");
        let result = executor.run("echo oops >&2; exit 1").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("oops"));
    }
}

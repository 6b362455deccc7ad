//! Scripted test doubles for the executor seam.
//!
//! No sockets, no processes: tests script exact command/response pairs
//! and assert on invocation counts. Shared by the engine's own tests and
//! by downstream crates wiring the engine into a daemon.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use faultline_common::command::CommandExecutionResult;
use faultline_common::errors::Result;
use faultline_common::specs::{CredentialsRef, EndpointSpec};

use crate::executor::{CommandExecutor, EndpointClientFactory};

/// Executor answering from a scripted command/response table.
pub struct ScriptedExecutor {
    target_name: String,
    responses: Mutex<HashMap<String, (i32, String)>>,
    fallback: Option<(i32, String)>,
    invocations: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            responses: Mutex::new(HashMap::new()),
            fallback: None,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Script an exact-match response for one command.
    pub fn respond(self, command: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.into(), (exit_code, output.into()));
        self
    }

    /// Answer every unscripted command with this failure.
    pub fn always_fail(mut self, exit_code: i32, output: impl Into<String>) -> Self {
        self.fallback = Some((exit_code, output.into()));
        self
    }

    /// Total `run` calls observed.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, command: &str) -> Result<CommandExecutionResult> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some((exit_code, output)) = self.responses.lock().unwrap().get(command) {
            return Ok(CommandExecutionResult::new(*exit_code, output.clone()));
        }
        if let Some((exit_code, output)) = &self.fallback {
            return Ok(CommandExecutionResult::new(*exit_code, output.clone()));
        }
        Ok(CommandExecutionResult::new(
            127,
            format!("scripted executor: no response for '{command}'"),
        ))
    }

    fn target(&self) -> String {
        self.target_name.clone()
    }
}

/// Factory handing the same executor to every endpoint.
pub struct StaticEndpointFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl StaticEndpointFactory {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl EndpointClientFactory for StaticEndpointFactory {
    async fn executor(
        &self,
        _credentials: &CredentialsRef,
        _endpoint: &EndpointSpec,
    ) -> Result<Arc<dyn CommandExecutor>> {
        Ok(Arc::clone(&self.executor))
    }
}

//! Task lifecycle orchestration.
//!
//! The helper owns the path from a validated [`FaultSpec`] to a terminal
//! [`Task`]: it initializes injection and remediation tasks, drives the
//! substage sequence (prerequisites, target preparation, trigger), runs
//! the fault's command lists through the [`CommandRunner`], enforces one
//! active fault per endpoint, and arms self-remediation timers for
//! long-lasting faults.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::FaultSpec;
use faultline_common::task::{SubStage, Task};
use faultline_common::types::{TaskId, TaskStatus, TaskType};

use crate::executor::EndpointClientFactory;
use crate::fault::{Fault, FaultRegistry};
use crate::runner::CommandRunner;
use crate::store::TaskStore;
use crate::tracker::LongLastingTracker;

const PAUSED_PROPERTY: &str = "autoRemediationPaused";

pub struct TaskHelper {
    registry: Arc<FaultRegistry>,
    factory: Arc<dyn EndpointClientFactory>,
    store: Arc<dyn TaskStore>,
    runner: CommandRunner,
    tracker: Arc<LongLastingTracker>,
}

impl TaskHelper {
    pub fn new(
        registry: Arc<FaultRegistry>,
        factory: Arc<dyn EndpointClientFactory>,
        store: Arc<dyn TaskStore>,
        runner: CommandRunner,
    ) -> Self {
        Self {
            registry,
            factory,
            store,
            runner,
            tracker: Arc::new(LongLastingTracker::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Validate a fault request and persist an initialized injection task.
    /// No command runs until [`TaskHelper::run`].
    pub fn init_injection(&self, spec: FaultSpec) -> Result<Task> {
        let fault = self.registry.get(&spec.fault_name)?;
        fault.validate(&spec)?;
        let mut task = Task::new(TaskType::Injection, spec);
        task.long_lasting = fault.is_long_lasting(&task.fault_spec);
        task.description = format!(
            "Injecting {} on endpoint {}",
            task.fault_spec.fault_name, task.fault_spec.endpoint.name
        );
        task.initialized = true;
        task.push_trigger();
        task.log_activity("task initialized");
        self.store.save(&task)?;
        Ok(task)
    }

    /// Build a remediation task for a completed injection. Rejected when
    /// the fault does not support remediation or was already remediated.
    pub fn init_remediation(&self, injected_task_id: &TaskId) -> Result<Task> {
        let injection = self.store.load(injected_task_id)?;
        if injection.task_type != TaskType::Injection {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "remediate".to_string(),
                    injected_task_id.to_string(),
                    "not an injection task".to_string(),
                ],
            ));
        }
        if injection.status() != TaskStatus::Completed {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "remediate".to_string(),
                    injected_task_id.to_string(),
                    format!("{:?}", injection.status()),
                ],
            ));
        }
        if injection.remediated {
            return Err(FaultlineError::with_args(
                ErrorCode::TaskAlreadyRemediated,
                [injected_task_id.to_string()],
            ));
        }
        let fault = self.registry.get(&injection.fault_spec.fault_name)?;
        if !fault.supports_remediation() {
            return Err(FaultlineError::with_args(
                ErrorCode::RemediationNotSupported,
                [injection.fault_spec.fault_name.clone()],
            ));
        }
        // Cancel a pending self-remediation timer; if it fired in the
        // meantime the agent answers "already remediated", which the
        // command classification treats as a clean end state.
        if injection.long_lasting {
            self.tracker.claim(injected_task_id);
        }
        let mut task = Task::new(TaskType::Remediation, injection.fault_spec.clone());
        task.injected_task_id = Some(injection.id.clone());
        task.properties = injection.properties.clone();
        task.description = format!(
            "Remediating {} on endpoint {}",
            task.fault_spec.fault_name, task.fault_spec.endpoint.name
        );
        task.initialized = true;
        task.push_trigger();
        task.log_activity(format!("remediation of task {}", injection.id));
        self.store.save(&task)?;
        Ok(task)
    }

    /// Execute an initialized task to a terminal status. The terminal
    /// task is persisted either way; failures are also returned.
    pub async fn run(self: &Arc<Self>, task_id: &TaskId) -> Result<Task> {
        let mut task = self.store.load(task_id)?;
        if !task.initialized {
            return Err(FaultlineError::with_args(
                ErrorCode::TaskNotInitialized,
                [task_id.to_string()],
            ));
        }
        if task.status().is_terminal() {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "run".to_string(),
                    task_id.to_string(),
                    format!("{:?}", task.status()),
                ],
            ));
        }
        let fault = self.registry.get(&task.fault_spec.fault_name)?;
        self.check_endpoint_slot(&task)?;

        // The init trigger carries the first attempt; re-attempts push a
        // fresh one.
        if task.status() != TaskStatus::Initializing {
            task.push_trigger();
        }
        task.update_status(TaskStatus::InProgress);
        task.update_substage(SubStage::Initialised);
        task.log_activity(format!("attempt {} started", task.triggers.len()));
        self.store.save(&task)?;
        info!(task_id = %task.id, fault = %task.fault_spec.fault_name, "task started");

        match self.drive(&mut task, fault.as_ref()).await {
            Ok(output) => {
                task.update_substage(SubStage::Completed);
                if let Some(trigger) = task.current_trigger_mut() {
                    trigger.task_output = Some(output);
                }
                task.update_status(TaskStatus::Completed);
                task.log_activity("task completed");
                self.store.save(&task)?;
                self.after_completion(&task)?;
                info!(task_id = %task.id, "task completed");
                Ok(task)
            }
            Err(err) => {
                // Exhausted command retries become a task-level failure;
                // classified and validation errors pass through untouched.
                let err = if err.code == ErrorCode::CommandExecutionFailed {
                    FaultlineError::with_args(ErrorCode::TaskExecutionFailed, [err.message()])
                } else {
                    err
                };
                if let Some(trigger) = task.current_trigger_mut() {
                    trigger.error = Some(err.to_string());
                }
                task.update_status(TaskStatus::Failed);
                task.log_activity(format!("task failed: {err}"));
                self.store.save(&task)?;
                error!(task_id = %task.id, %err, "task failed");
                Err(err)
            }
        }
    }

    /// One fault at a time per endpoint. A remediation task may run while
    /// its own injection holds the slot; everything else is rejected.
    fn check_endpoint_slot(&self, task: &Task) -> Result<()> {
        let holder = self
            .store
            .slot_holder_for_endpoint(&task.fault_spec.endpoint.name);
        match holder {
            None => Ok(()),
            Some(id) if id == task.id => Ok(()),
            Some(id) if task.injected_task_id.as_ref() == Some(&id) => Ok(()),
            Some(id) => Err(FaultlineError::with_args(
                ErrorCode::ConcurrentExecutionNotSupported,
                [task.fault_spec.endpoint.name.clone(), id.to_string()],
            )),
        }
    }

    async fn drive(self: &Arc<Self>, task: &mut Task, fault: &dyn Fault) -> Result<String> {
        let spec = task.fault_spec.clone();
        let mut args = spec.args.clone();
        for (key, value) in fault.specific_args(&spec) {
            args.entry(key).or_insert(value);
        }
        args.insert("taskId".to_string(), task.id.to_string());

        let executor = self.factory.executor(&spec.credentials, &spec.endpoint).await?;
        task.log_activity(format!("target: {}", executor.target()));

        task.update_substage(SubStage::PrerequisitesCheck);
        self.store.save(task)?;
        let prerequisites = fault.prerequisite_commands(&spec, task.task_type);
        if !prerequisites.is_empty() {
            self.runner
                .execute(executor.as_ref(), &prerequisites, &args, &mut task.properties)
                .await?;
            task.log_activity("prerequisites passed");
        }

        // Target preparation runs once, on the first injection attempt.
        if task.task_type == TaskType::Injection && task.triggers.len() == 1 {
            let preparation = fault.preparation_commands(&spec);
            if !preparation.is_empty() {
                task.update_substage(SubStage::PrepareTargetMachine);
                self.store.save(task)?;
                self.runner
                    .execute(executor.as_ref(), &preparation, &args, &mut task.properties)
                    .await?;
                task.log_activity("target prepared");
            }
        }

        let (substage, commands) = match task.task_type {
            TaskType::Injection => (SubStage::TriggerInjection, fault.injection_commands(&spec)?),
            TaskType::Remediation => (
                SubStage::TriggerRemediation,
                fault.remediation_commands(&spec)?,
            ),
        };
        task.update_substage(substage);
        self.store.save(task)?;
        let results = self
            .runner
            .execute(executor.as_ref(), &commands, &args, &mut task.properties)
            .await?;
        Ok(results
            .last()
            .map(|r| r.output.clone())
            .unwrap_or_default())
    }

    /// Post-completion bookkeeping: arm the self-remediation timer for
    /// long-lasting injections, mark the injection remediated after a
    /// successful remediation.
    fn after_completion(self: &Arc<Self>, task: &Task) -> Result<()> {
        match task.task_type {
            TaskType::Injection if task.long_lasting => {
                if let Some(window) = self.remediation_window(task) {
                    self.arm_self_remediation(task.id.clone(), window);
                }
                Ok(())
            }
            TaskType::Injection => Ok(()),
            TaskType::Remediation => {
                if let Some(injected_id) = &task.injected_task_id {
                    let mut injection = self.store.load(injected_id)?;
                    injection.remediated = true;
                    injection.log_activity(format!("remediated by task {}", task.id));
                    self.store.save(&injection)?;
                }
                Ok(())
            }
        }
    }

    fn remediation_window(&self, task: &Task) -> Option<Duration> {
        let from_arg = task
            .fault_spec
            .args
            .get("timeOutInMilliSeconds")
            .and_then(|v| v.parse::<u64>().ok());
        from_arg
            .or(task.fault_spec.timeout_ms)
            .map(Duration::from_millis)
    }

    fn arm_self_remediation(self: &Arc<Self>, injection_id: TaskId, window: Duration) {
        let helper = Arc::clone(self);
        let id = injection_id.clone();
        let handle = tokio::spawn(async move {
            sleep(window).await;
            if !helper.tracker.fire(&id) {
                return;
            }
            info!(task_id = %id, "fault window elapsed, self-remediating");
            match helper.init_remediation(&id) {
                Ok(remediation) => {
                    if let Err(err) = helper.run(&remediation.id).await {
                        warn!(task_id = %id, %err, "self-remediation failed");
                    }
                }
                Err(err) => warn!(task_id = %id, %err, "self-remediation skipped"),
            }
        });
        self.tracker.arm(injection_id, handle);
    }

    /// Pause a long-lasting injection's pending self-remediation timer.
    pub fn pause(&self, task_id: &TaskId) -> Result<Task> {
        let mut task = self.store.load(task_id)?;
        let fault = self.registry.get(&task.fault_spec.fault_name)?;
        if !fault.supports_pause() {
            return Err(FaultlineError::with_args(
                ErrorCode::PauseNotSupported,
                [task.fault_spec.fault_name.clone()],
            ));
        }
        if !task.occupies_target_slot() || !self.tracker.claim(task_id) {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "pause".to_string(),
                    task_id.to_string(),
                    "awaiting no remediation timer".to_string(),
                ],
            ));
        }
        task.properties
            .insert(PAUSED_PROPERTY.to_string(), "true".to_string());
        task.log_activity("self-remediation timer paused");
        self.store.save(&task)?;
        Ok(task)
    }

    /// Re-arm the self-remediation timer of a paused injection.
    pub fn resume(self: &Arc<Self>, task_id: &TaskId) -> Result<Task> {
        let mut task = self.store.load(task_id)?;
        let fault = self.registry.get(&task.fault_spec.fault_name)?;
        if !fault.supports_pause() {
            return Err(FaultlineError::with_args(
                ErrorCode::PauseNotSupported,
                [task.fault_spec.fault_name.clone()],
            ));
        }
        if task.properties.remove(PAUSED_PROPERTY).is_none() {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "resume".to_string(),
                    task_id.to_string(),
                    "not paused".to_string(),
                ],
            ));
        }
        if let Some(window) = self.remediation_window(&task) {
            self.arm_self_remediation(task.id.clone(), window);
        }
        task.log_activity("self-remediation timer resumed");
        self.store.save(&task)?;
        Ok(task)
    }

    /// Cancel an initialized task that has not started. Only defined for
    /// faults without remediation support; everything else remediates.
    pub fn cancel(&self, task_id: &TaskId) -> Result<Task> {
        let mut task = self.store.load(task_id)?;
        let fault = self.registry.get(&task.fault_spec.fault_name)?;
        if fault.supports_remediation() {
            return Err(FaultlineError::with_args(
                ErrorCode::CancelNotSupported,
                [task.fault_spec.fault_name.clone()],
            ));
        }
        if task.status() != TaskStatus::Initializing {
            return Err(FaultlineError::with_args(
                ErrorCode::InvalidTaskState,
                [
                    "cancel".to_string(),
                    task_id.to_string(),
                    format!("{:?}", task.status()),
                ],
            ));
        }
        if task.triggers.is_empty() {
            task.push_trigger();
        }
        task.update_status(TaskStatus::Cancelled);
        task.log_activity("task cancelled before execution");
        self.store.save(&task)?;
        Ok(task)
    }
}

//! Persistent state machine wrapping one fault execution attempt.
//!
//! A [`Task`] is created once per attempt and mutated only by its owning
//! helper. It is never deleted while active, only marked terminal. The
//! trigger stack grows on every (re)attempt and is the replay/audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::specs::FaultSpec;
use crate::types::{TaskId, TaskStatus, TaskType};

/// Checkpoint inside one trigger, enabling resume-after-crash semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStage {
    Initialised,
    PrerequisitesCheck,
    PrepareTargetMachine,
    TriggerInjection,
    TriggerRemediation,
    Completed,
}

/// One attempt record on the task's trigger stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTrigger {
    pub status: TaskStatus,
    pub substage: SubStage,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub task_output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskTrigger {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Initializing,
            substage: SubStage::Initialised,
            started_at: Utc::now(),
            ended_at: None,
            task_output: None,
            error: None,
        }
    }
}

impl Default for TaskTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// The persistent shape of one injection or remediation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub fault_spec: FaultSpec,
    /// Grow-only attempt stack; the top entry is the current attempt.
    pub triggers: Vec<TaskTrigger>,
    /// Append-only human-readable log of lifecycle activity.
    pub activity_log: Vec<String>,
    pub initialized: bool,
    /// Fault stays active until remediated or until its timeout elapses.
    pub long_lasting: bool,
    /// Set on the injection task once a remediation task completed for it.
    #[serde(default)]
    pub remediated: bool,
    /// For remediation tasks, the injection task being remediated.
    #[serde(default)]
    pub injected_task_id: Option<TaskId>,
    /// Properties extracted from command outputs, consumed by later
    /// steps and by the remediation command builder.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub description: String,
}

impl Task {
    /// Build an uninitialized task shell; `init` on the helper completes it.
    pub fn new(task_type: TaskType, fault_spec: FaultSpec) -> Self {
        Self {
            id: TaskId::generate(),
            task_type,
            fault_spec,
            triggers: Vec::new(),
            activity_log: Vec::new(),
            initialized: false,
            long_lasting: false,
            remediated: false,
            injected_task_id: None,
            properties: BTreeMap::new(),
            description: String::new(),
        }
    }

    /// The current attempt's status; `Initializing` before the first push.
    pub fn status(&self) -> TaskStatus {
        self.triggers
            .last()
            .map(|t| t.status)
            .unwrap_or(TaskStatus::Initializing)
    }

    pub fn current_trigger(&self) -> Option<&TaskTrigger> {
        self.triggers.last()
    }

    pub fn current_trigger_mut(&mut self) -> Option<&mut TaskTrigger> {
        self.triggers.last_mut()
    }

    /// Push a fresh trigger for a new attempt. The stack only grows.
    pub fn push_trigger(&mut self) {
        self.triggers.push(TaskTrigger::new());
    }

    /// Advance the current attempt's status. Transitions are monotonic:
    /// a terminal trigger is never reopened; re-attempts push a new one.
    pub fn update_status(&mut self, status: TaskStatus) {
        if let Some(trigger) = self.triggers.last_mut() {
            if trigger.status.is_terminal() {
                return;
            }
            trigger.status = status;
            if status.is_terminal() {
                trigger.ended_at = Some(Utc::now());
            }
        }
    }

    pub fn update_substage(&mut self, substage: SubStage) {
        if let Some(trigger) = self.triggers.last_mut() {
            trigger.substage = substage;
        }
    }

    /// Append a timestamped line to the activity log.
    pub fn log_activity(&mut self, message: impl AsRef<str>) {
        self.activity_log
            .push(format!("{} {}", Utc::now().to_rfc3339(), message.as_ref()));
    }

    /// True while the top trigger has started and not reached a terminal
    /// status. An `Initializing` trigger has not started yet.
    pub fn is_active(&self) -> bool {
        self.triggers
            .last()
            .map(|t| !t.status.is_terminal() && t.status != TaskStatus::Initializing)
            .unwrap_or(false)
    }

    /// True while this task claims its target's fault slot: either it is
    /// still running, or it is a completed long-lasting injection awaiting
    /// remediation.
    pub fn occupies_target_slot(&self) -> bool {
        if self.is_active() {
            return true;
        }
        self.task_type == TaskType::Injection
            && self.long_lasting
            && self.status() == TaskStatus::Completed
            && !self.remediated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{CredentialsRef, EndpointSpec};
    use crate::types::EndpointType;

    fn task() -> Task {
        let spec = FaultSpec::new(
            "killProcessFault",
            EndpointSpec::new("web-01", EndpointType::Machine),
            CredentialsRef::new("web-creds"),
        );
        Task::new(TaskType::Injection, spec)
    }

    #[test]
    fn status_defaults_to_initializing() {
        let t = task();
        assert_eq!(t.status(), TaskStatus::Initializing);
        assert!(!t.is_active());
    }

    #[test]
    fn trigger_stack_only_grows() {
        let mut t = task();
        t.push_trigger();
        t.update_status(TaskStatus::Failed);
        t.push_trigger();
        t.update_status(TaskStatus::InProgress);
        assert_eq!(t.triggers.len(), 2);
        assert_eq!(t.triggers[0].status, TaskStatus::Failed);
        assert_eq!(t.status(), TaskStatus::InProgress);
    }

    #[test]
    fn terminal_trigger_is_never_reopened() {
        let mut t = task();
        t.push_trigger();
        t.update_status(TaskStatus::Completed);
        t.update_status(TaskStatus::InProgress);
        assert_eq!(t.status(), TaskStatus::Completed);
        assert!(t.current_trigger().unwrap().ended_at.is_some());
    }

    #[test]
    fn activity_log_is_append_only_and_timestamped() {
        let mut t = task();
        t.log_activity("injection started");
        t.log_activity("injection completed");
        assert_eq!(t.activity_log.len(), 2);
        assert!(t.activity_log[0].ends_with("injection started"));
    }
}

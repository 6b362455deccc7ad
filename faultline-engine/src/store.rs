//! Task persistence behind a trait so the engine never assumes a backing
//! store. The in-memory implementation is the default for a single-node
//! daemon and for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::task::Task;
use faultline_common::types::TaskId;

pub trait TaskStore: Send + Sync {
    fn save(&self, task: &Task) -> Result<()>;

    fn load(&self, id: &TaskId) -> Result<Task>;

    fn list(&self) -> Vec<Task>;

    /// The task currently holding the injection slot for an endpoint, if
    /// any. A slot is held by an active task, or by a completed
    /// long-lasting injection that has not been remediated yet.
    fn slot_holder_for_endpoint(&self, endpoint_name: &str) -> Option<TaskId>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| FaultlineError::new(ErrorCode::InternalStateError))?;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn load(&self, id: &TaskId) -> Result<Task> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|_| FaultlineError::new(ErrorCode::InternalStateError))?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| FaultlineError::with_args(ErrorCode::TaskNotFound, [id.to_string()]))
    }

    fn list(&self) -> Vec<Task> {
        match self.tasks.lock() {
            Ok(tasks) => tasks.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn slot_holder_for_endpoint(&self, endpoint_name: &str) -> Option<TaskId> {
        let tasks = self.tasks.lock().ok()?;
        tasks
            .values()
            .find(|task| {
                task.fault_spec.endpoint.name == endpoint_name && task.occupies_target_slot()
            })
            .map(|task| task.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::specs::{CredentialsRef, EndpointSpec, FaultSpec};
    use faultline_common::types::{EndpointType, TaskStatus, TaskType};

    fn injection_task(endpoint: &str) -> Task {
        let spec = FaultSpec::new(
            "cpuFault",
            EndpointSpec::new(endpoint, EndpointType::Process),
            CredentialsRef::new("creds"),
        );
        Task::new(TaskType::Injection, spec)
    }

    #[test]
    fn load_of_unknown_id_is_task_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store.load(&TaskId::generate()).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = InMemoryTaskStore::new();
        let task = injection_task("svc-01");
        store.save(&task).unwrap();
        let loaded = store.load(&task.id).unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.fault_spec.fault_name, "cpuFault");
    }

    #[test]
    fn active_task_holds_the_endpoint_slot() {
        let store = InMemoryTaskStore::new();
        let mut task = injection_task("svc-01");
        task.push_trigger();
        task.update_status(TaskStatus::InProgress);
        store.save(&task).unwrap();
        assert_eq!(store.slot_holder_for_endpoint("svc-01"), Some(task.id.clone()));
        assert_eq!(store.slot_holder_for_endpoint("svc-02"), None);
    }

    #[test]
    fn remediated_long_lasting_task_releases_the_slot() {
        let store = InMemoryTaskStore::new();
        let mut task = injection_task("svc-01");
        task.long_lasting = true;
        task.push_trigger();
        task.update_status(TaskStatus::InProgress);
        task.update_status(TaskStatus::Completed);
        store.save(&task).unwrap();
        assert!(store.slot_holder_for_endpoint("svc-01").is_some());

        task.remediated = true;
        store.save(&task).unwrap();
        assert_eq!(store.slot_holder_for_endpoint("svc-01"), None);
    }
}

//! End-to-end agent fault scenario through the full engine stack: the
//! real registry, the real command runner, and an in-process agent as
//! the endpoint transport.
//!
//! Covers: inject `cpuFault {timeOutInMilliSeconds: 10000, load: 30}` on
//! a process target, list live faults, remediate, re-remediate (idempotent
//! "already remediated"), and remediate an unknown id ("not found").

use std::collections::BTreeMap;
use std::sync::Arc;

use faultline_common::config::EngineConfig;
use faultline_common::errors::ErrorCode;
use faultline_common::specs::{CredentialsRef, EndpointSpec, FaultSpec};
use faultline_common::types::{EndpointType, TaskStatus, TaskType};
use faultline_engine::executor::DefaultEndpointClientFactory;
use faultline_engine::store::InMemoryTaskStore;
use faultline_engine::{AgentController, CommandRunner, FaultRegistry, TaskHelper};

fn engine_with_agent() -> (Arc<TaskHelper>, Arc<AgentController>) {
    let agent = AgentController::new();
    let config = EngineConfig {
        default_retry_interval_secs: 0,
        ..EngineConfig::default()
    };
    let helper = Arc::new(TaskHelper::new(
        Arc::new(FaultRegistry::builtin()),
        Arc::new(DefaultEndpointClientFactory::new(Arc::clone(&agent))),
        Arc::new(InMemoryTaskStore::new()),
        CommandRunner::new(&config),
    ));
    (helper, agent)
}

fn cpu_fault_spec() -> FaultSpec {
    FaultSpec::new(
        "cpuFault",
        EndpointSpec::new("payments-jvm", EndpointType::Process),
        CredentialsRef::new("payments-creds"),
    )
    .arg("load", "30")
    .arg("timeOutInMilliSeconds", "10000")
}

#[tokio::test]
async fn inject_list_remediate_lifecycle() {
    let (helper, agent) = engine_with_agent();

    let task = helper.init_injection(cpu_fault_spec()).unwrap();
    let injected = helper.run(&task.id).await.unwrap();
    assert_eq!(injected.status(), TaskStatus::Completed);
    assert!(injected.long_lasting);

    // The agent-side fault id was extracted from the install response.
    let fault_id = injected.properties.get("faultId").cloned().unwrap();

    let live: BTreeMap<String, String> =
        serde_json::from_str(&agent.list_long_lasting()).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live.get(&fault_id).map(String::as_str), Some("cpuFault"));

    let remediation = helper.init_remediation(&task.id).unwrap();
    assert_eq!(remediation.task_type, TaskType::Remediation);
    let remediated = helper.run(&remediation.id).await.unwrap();
    assert_eq!(remediated.status(), TaskStatus::Completed);

    // The injection is marked remediated and releases its target slot.
    let injection = helper.store().load(&task.id).unwrap();
    assert!(injection.remediated);
    assert!(!injection.occupies_target_slot());

    let live: BTreeMap<String, String> =
        serde_json::from_str(&agent.list_long_lasting()).unwrap();
    assert!(live.is_empty());
}

#[tokio::test]
async fn second_remediation_is_rejected_and_agent_stays_idempotent() {
    let (helper, agent) = engine_with_agent();

    let task = helper.init_injection(cpu_fault_spec()).unwrap();
    let injected = helper.run(&task.id).await.unwrap();
    let fault_id = injected.properties.get("faultId").cloned().unwrap();

    let remediation = helper.init_remediation(&task.id).unwrap();
    helper.run(&remediation.id).await.unwrap();

    // Engine level: the injection is already remediated.
    let err = helper.init_remediation(&task.id).unwrap_err();
    assert_eq!(err.code, ErrorCode::TaskAlreadyRemediated);

    // Wire level: same outcome twice, and unknown ids never fail hard.
    assert_eq!(
        agent.remediate(&fault_id),
        "Requested Fault is already Remediated."
    );
    assert_eq!(
        agent.remediate(&fault_id),
        "Requested Fault is already Remediated."
    );
    let unknown = uuid::Uuid::new_v4().to_string();
    assert_eq!(
        agent.remediate(&unknown),
        format!("No fault found with provided ID: {unknown}")
    );
}

#[tokio::test]
async fn duplicate_injection_on_same_target_is_rejected() {
    let (helper, _agent) = engine_with_agent();

    let first = helper.init_injection(cpu_fault_spec()).unwrap();
    helper.run(&first.id).await.unwrap();

    // The completed long-lasting injection still holds the slot.
    let second = helper.init_injection(cpu_fault_spec()).unwrap();
    let err = helper.run(&second.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ConcurrentExecutionNotSupported);

    // After remediation the slot opens up again; the agent accepts a new
    // install of the same fault type.
    let remediation = helper.init_remediation(&first.id).unwrap();
    helper.run(&remediation.id).await.unwrap();
    let third = helper.init_injection(cpu_fault_spec()).unwrap();
    let done = helper.run(&third.id).await.unwrap();
    assert_eq!(done.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn pause_keeps_the_injection_completed_and_resume_rearms() {
    let (helper, _agent) = engine_with_agent();

    let task = helper.init_injection(cpu_fault_spec()).unwrap();
    helper.run(&task.id).await.unwrap();

    // Pausing disarms the timer; the task itself stays a completed,
    // slot-holding injection, flagged only through its properties.
    let paused = helper.pause(&task.id).unwrap();
    assert_eq!(paused.status(), TaskStatus::Completed);
    assert!(paused.occupies_target_slot());
    assert_eq!(
        paused.properties.get("autoRemediationPaused").map(String::as_str),
        Some("true")
    );

    // No timer left to claim.
    let err = helper.pause(&task.id).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTaskState);

    let resumed = helper.resume(&task.id).unwrap();
    assert_eq!(resumed.status(), TaskStatus::Completed);
    assert!(!resumed.properties.contains_key("autoRemediationPaused"));
}

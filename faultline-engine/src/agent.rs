//! In-process fault agent and its control-channel contract.
//!
//! Process endpoints host a companion agent rather than a shell. Its
//! control channel understands three argv-style operations: `-if <key>
//! <value> ...` installs a fault, `-llf` lists live long-lasting faults
//! as a JSON id-to-name map, `-rf <id>` winds one down. The engine talks
//! to it through [`AgentExecutor`], so agent operations flow through the
//! same command runner, retry policy and known-failure classification as
//! every other endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use faultline_common::command::CommandExecutionResult;
use faultline_common::errors::Result;

use crate::executor::CommandExecutor;

const SUPPORTED_FAULTS: &[&str] = &["cpuFault", "memoryFault"];

pub const WRONG_FAULT_NAME_RESPONSE: &str = "Fault Name is Wrong.Please check your command";
pub const ALREADY_REMEDIATED_RESPONSE: &str = "Requested Fault is already Remediated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveFaultStatus {
    Active,
    Remediated,
}

#[derive(Debug, Clone)]
struct LiveFault {
    fault_name: String,
    status: LiveFaultStatus,
}

/// Simulated agent state machine, one per managed process.
///
/// Installed faults wind themselves down when their run window elapses,
/// exactly like a remediation request arriving at that instant.
#[derive(Default)]
pub struct AgentController {
    faults: Mutex<HashMap<String, LiveFault>>,
}

impl AgentController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `-if`: install a fault from key/value argument pairs.
    pub fn install(self: &Arc<Self>, args: &BTreeMap<String, String>) -> String {
        let Some(fault_name) = args.get("faultName") else {
            return WRONG_FAULT_NAME_RESPONSE.to_string();
        };
        if !SUPPORTED_FAULTS.contains(&fault_name.as_str()) {
            return WRONG_FAULT_NAME_RESPONSE.to_string();
        }
        let mut faults = match self.faults.lock() {
            Ok(faults) => faults,
            Err(_) => return "Agent state unavailable".to_string(),
        };
        let already_live = faults.values().any(|f| {
            f.fault_name == *fault_name && f.status == LiveFaultStatus::Active
        });
        if already_live {
            return format!(
                "Fault {fault_name} is already running. Remediate it before injecting again"
            );
        }
        let id = uuid::Uuid::new_v4().to_string();
        faults.insert(
            id.clone(),
            LiveFault {
                fault_name: fault_name.clone(),
                status: LiveFaultStatus::Active,
            },
        );
        drop(faults);

        if let Some(window_ms) = args
            .get("timeOutInMilliSeconds")
            .and_then(|v| v.parse::<u64>().ok())
        {
            let agent = Arc::clone(self);
            let timed_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(window_ms)).await;
                if agent.wind_down(&timed_id) {
                    info!(fault_id = %timed_id, "agent fault window elapsed");
                }
            });
        }
        info!(fault_id = %id, fault = %fault_name, "agent fault installed");
        format!("Created Fault Successfully with Id: {id}")
    }

    /// `-llf`: JSON map of live long-lasting fault ids to fault names.
    pub fn list_long_lasting(&self) -> String {
        let live: BTreeMap<String, String> = match self.faults.lock() {
            Ok(faults) => faults
                .iter()
                .filter(|(_, f)| f.status == LiveFaultStatus::Active)
                .map(|(id, f)| (id.clone(), f.fault_name.clone()))
                .collect(),
            Err(_) => BTreeMap::new(),
        };
        serde_json::to_string(&live).unwrap_or_else(|_| "{}".to_string())
    }

    /// `-rf <id>`: remediate a live fault. Idempotent by response, never
    /// by failure: a repeated id answers "already remediated", an unknown
    /// or blank id answers "not found".
    pub fn remediate(&self, fault_id: &str) -> String {
        if fault_id.trim().is_empty() {
            return format!("No fault found with provided ID: {fault_id}");
        }
        let mut faults = match self.faults.lock() {
            Ok(faults) => faults,
            Err(_) => return "Agent state unavailable".to_string(),
        };
        match faults.get_mut(fault_id) {
            Some(fault) if fault.status == LiveFaultStatus::Active => {
                fault.status = LiveFaultStatus::Remediated;
                info!(%fault_id, "agent fault remediated");
                "Received Remediation Request Successfully".to_string()
            }
            Some(_) => ALREADY_REMEDIATED_RESPONSE.to_string(),
            None => format!("No fault found with provided ID: {fault_id}"),
        }
    }

    /// Timer-driven wind-down; false when a remediation request won.
    fn wind_down(&self, fault_id: &str) -> bool {
        let mut faults = match self.faults.lock() {
            Ok(faults) => faults,
            Err(_) => return false,
        };
        match faults.get_mut(fault_id) {
            Some(fault) if fault.status == LiveFaultStatus::Active => {
                fault.status = LiveFaultStatus::Remediated;
                true
            }
            _ => false,
        }
    }

    /// Dispatch one argv-style control-channel invocation.
    pub fn handle(self: &Arc<Self>, argv: &[&str]) -> String {
        match argv.first().copied() {
            Some("-if") => {
                let mut args = BTreeMap::new();
                for pair in argv[1..].chunks(2) {
                    if let [key, value] = pair {
                        args.insert((*key).to_string(), (*value).to_string());
                    }
                }
                self.install(&args)
            }
            Some("-llf") => self.list_long_lasting(),
            Some("-rf") => self.remediate(argv.get(1).copied().unwrap_or("")),
            _ => WRONG_FAULT_NAME_RESPONSE.to_string(),
        }
    }
}

/// Presents the agent control channel as a [`CommandExecutor`], so agent
/// faults run through the ordinary command pipeline.
pub struct AgentExecutor {
    target_name: String,
    agent: Arc<AgentController>,
}

impl AgentExecutor {
    pub fn new(target_name: impl Into<String>, agent: Arc<AgentController>) -> Self {
        Self {
            target_name: target_name.into(),
            agent,
        }
    }
}

#[async_trait]
impl CommandExecutor for AgentExecutor {
    async fn run(&self, command: &str) -> Result<CommandExecutionResult> {
        let argv: Vec<&str> = command.split_whitespace().collect();
        debug!(target_name = %self.target_name, %command, "agent control call");
        // The channel reports outcomes in its response text; the exit
        // code is always 0 and classification happens on the output.
        Ok(CommandExecutionResult::new(0, self.agent.handle(&argv)))
    }

    fn target(&self) -> String {
        format!("agent:{}", self.target_name)
    }
}

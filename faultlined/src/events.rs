//! Broadcast channel for task and schedule lifecycle events.
//!
//! Subscribers (a future streaming API, notifiers) receive JSON lines;
//! nothing blocks on a slow or absent subscriber.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

use faultline_common::types::{TaskId, TaskStatus, TaskType};

const DEFAULT_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DaemonEvent {
    TaskTransition {
        task_id: TaskId,
        task_type: TaskType,
        fault_name: String,
        endpoint: String,
        status: TaskStatus,
    },
    ScheduleFired {
        schedule_id: String,
        fault_name: String,
        endpoint: String,
    },
}

/// Fan-out bus for daemon events, one JSON line per event.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// The buffer is clamped to at least `DEFAULT_BUFFER`; bursty task
    /// transitions should not lag a subscriber.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(DEFAULT_BUFFER));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: &DaemonEvent) {
        let payload = json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!(%err, "failed to serialize daemon event"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_transition_round_trips_as_json_line() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(&DaemonEvent::TaskTransition {
            task_id: TaskId::new("t-1"),
            task_type: TaskType::Injection,
            fault_name: "cpuFault".to_string(),
            endpoint: "svc-01".to_string(),
            status: TaskStatus::Completed,
        });

        let line = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"]["kind"], "task_transition");
        assert_eq!(parsed["event"]["fault_name"], "cpuFault");
        assert_eq!(parsed["event"]["status"], "COMPLETED");
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_a_no_op() {
        let bus = EventBus::default();
        bus.emit(&DaemonEvent::ScheduleFired {
            schedule_id: "s-1".to_string(),
            fault_name: "memoryFault".to_string(),
            endpoint: "svc-02".to_string(),
        });
    }
}

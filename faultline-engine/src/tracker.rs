//! Ownership tracking for long-lasting faults' self-remediation timers.
//!
//! When a long-lasting injection completes, the helper arms a timer that
//! remediates the fault once its window elapses. Manual remediation and
//! the timer race for the same fault; the tracker hands out a single
//! claim so exactly one of them runs.

use std::collections::HashMap;
use std::sync::Mutex;

use faultline_common::types::TaskId;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct LongLastingTracker {
    timers: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl LongLastingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for an injection task. Replaces (and cancels) any timer
    /// already armed for the same task.
    pub fn arm(&self, id: TaskId, handle: JoinHandle<()>) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some(previous) = timers.insert(id, handle) {
                previous.abort();
            }
        }
    }

    /// Claim the fault for manual remediation, cancelling the pending
    /// timer. Returns false when the timer already fired (or nothing was
    /// armed), in which case the caller must not remediate again.
    pub fn claim(&self, id: &TaskId) -> bool {
        match self.timers.lock() {
            Ok(mut timers) => match timers.remove(id) {
                Some(handle) => {
                    handle.abort();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Claim the fault from inside the firing timer. Does not abort the
    /// handle (the caller is the timer task itself).
    pub fn fire(&self, id: &TaskId) -> bool {
        match self.timers.lock() {
            Ok(mut timers) => timers.remove(id).is_some(),
            Err(_) => false,
        }
    }

    pub fn is_armed(&self, id: &TaskId) -> bool {
        self.timers.lock().map(|t| t.contains_key(id)).unwrap_or(false)
    }
}

impl Drop for LongLastingTracker {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.lock() {
            for handle in timers.values() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn claim_wins_exactly_once() {
        let tracker = LongLastingTracker::new();
        let id = TaskId::generate();
        tracker.arm(
            id.clone(),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        assert!(tracker.is_armed(&id));
        assert!(tracker.claim(&id));
        assert!(!tracker.claim(&id));
        assert!(!tracker.fire(&id));
    }

    #[tokio::test]
    async fn fire_blocks_a_later_manual_claim() {
        let tracker = LongLastingTracker::new();
        let id = TaskId::generate();
        tracker.arm(
            id.clone(),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        assert!(tracker.fire(&id));
        assert!(!tracker.claim(&id));
    }
}

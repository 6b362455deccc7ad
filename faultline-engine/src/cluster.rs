//! Cluster membership and replicated state behind a trait.
//!
//! The engine never talks to a concrete coordination service. It needs a
//! membership view, per-node status attributes, and a replicated
//! key/value space; any consensus-capable backend can provide those. The
//! in-memory implementation serves single-node deployments and the
//! multi-node simulations in tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::types::{NodeId, NodeStatus};

pub trait ClusterCoordinator: Send + Sync {
    fn local_id(&self) -> NodeId;

    /// Live members, in stable order.
    fn members(&self) -> Vec<NodeId>;

    fn set_local_attribute(&self, key: &str, value: &str);

    fn attribute(&self, member: &NodeId, key: &str) -> Option<String>;

    fn kv_put(&self, key: &str, value: &str);

    fn kv_get(&self, key: &str) -> Option<String>;

    fn kv_remove(&self, key: &str) -> Option<String>;

    fn kv_keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// True when this node is the current owner: the lowest-ordered live
    /// member. Owner-only work (schedule dispatch) keys off this.
    fn is_owner(&self) -> bool {
        self.members().first() == Some(&self.local_id())
    }
}

const STATUS_ATTRIBUTE: &str = "status";
const CONVERGENCE_POLL: Duration = Duration::from_millis(50);

/// Set this node's status attribute and wait until every member's view
/// reflects it, bounded by `budget`. Fatal for the calling operation on
/// timeout, never retried here.
pub async fn propagate_node_status(
    coordinator: &dyn ClusterCoordinator,
    status: NodeStatus,
    budget: Duration,
) -> Result<()> {
    let value = status.as_str().to_string();
    coordinator.set_local_attribute(STATUS_ATTRIBUTE, &value);
    let local = coordinator.local_id();
    let deadline = Instant::now() + budget;
    loop {
        // The write has converged once the replicated view (not the
        // local write buffer) serves it back.
        let converged =
            coordinator.attribute(&local, STATUS_ATTRIBUTE).as_deref() == Some(value.as_str());
        if converged {
            info!(node = %local.0, %value, "node status propagated");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FaultlineError::with_args(
                ErrorCode::ClusterConvergenceTimeout,
                [value, budget.as_millis().to_string()],
            ));
        }
        tokio::time::sleep(CONVERGENCE_POLL).await;
    }
}

#[derive(Default)]
struct SharedState {
    members: BTreeMap<NodeId, BTreeMap<String, AttributeEntry>>,
    kv: BTreeMap<String, String>,
}

struct AttributeEntry {
    value: String,
    visible_after: Instant,
}

/// Simulated cluster shared by every [`InMemoryClusterNode`] joined to it.
///
/// Attribute writes may be given a visibility lag so convergence-wait
/// paths can be exercised.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<SharedState>,
    attribute_lag: Mutex<Duration>,
}

impl InMemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay applied between an attribute write and its visibility to
    /// readers.
    pub fn set_attribute_lag(&self, lag: Duration) {
        if let Ok(mut slot) = self.attribute_lag.lock() {
            *slot = lag;
        }
    }

    pub fn join(self: &Arc<Self>, name: impl Into<String>) -> InMemoryClusterNode {
        let id = NodeId(name.into());
        if let Ok(mut state) = self.state.lock() {
            state.members.entry(id.clone()).or_default();
        }
        debug!(node = %id.0, "member joined");
        InMemoryClusterNode {
            cluster: Arc::clone(self),
            id,
        }
    }

    pub fn leave(&self, id: &NodeId) {
        if let Ok(mut state) = self.state.lock() {
            state.members.remove(id);
        }
        debug!(node = %id.0, "member left");
    }
}

/// One node's handle onto a shared [`InMemoryCluster`].
pub struct InMemoryClusterNode {
    cluster: Arc<InMemoryCluster>,
    id: NodeId,
}

impl ClusterCoordinator for InMemoryClusterNode {
    fn local_id(&self) -> NodeId {
        self.id.clone()
    }

    fn members(&self) -> Vec<NodeId> {
        match self.cluster.state.lock() {
            Ok(state) => state.members.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn set_local_attribute(&self, key: &str, value: &str) {
        let lag = self
            .cluster
            .attribute_lag
            .lock()
            .map(|l| *l)
            .unwrap_or(Duration::ZERO);
        if let Ok(mut state) = self.cluster.state.lock() {
            if let Some(attributes) = state.members.get_mut(&self.id) {
                attributes.insert(
                    key.to_string(),
                    AttributeEntry {
                        value: value.to_string(),
                        visible_after: Instant::now() + lag,
                    },
                );
            }
        }
    }

    fn attribute(&self, member: &NodeId, key: &str) -> Option<String> {
        let state = self.cluster.state.lock().ok()?;
        let entry = state.members.get(member)?.get(key)?;
        if Instant::now() < entry.visible_after {
            return None;
        }
        Some(entry.value.clone())
    }

    fn kv_put(&self, key: &str, value: &str) {
        if let Ok(mut state) = self.cluster.state.lock() {
            state.kv.insert(key.to_string(), value.to_string());
        }
    }

    fn kv_get(&self, key: &str) -> Option<String> {
        self.cluster.state.lock().ok()?.kv.get(key).cloned()
    }

    fn kv_remove(&self, key: &str) -> Option<String> {
        self.cluster.state.lock().ok()?.kv.remove(key)
    }

    fn kv_keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        match self.cluster.state.lock() {
            Ok(state) => state
                .kv
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_ordered_member_owns_the_cluster() {
        let cluster = InMemoryCluster::new();
        let b = cluster.join("node-b");
        let a = cluster.join("node-a");
        assert!(a.is_owner());
        assert!(!b.is_owner());

        cluster.leave(&a.local_id());
        assert!(b.is_owner());
    }

    #[test]
    fn kv_space_is_shared_across_handles() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join("node-a");
        let b = cluster.join("node-b");
        a.kv_put("faultline/schedules/s1", "{}");
        assert_eq!(b.kv_get("faultline/schedules/s1").as_deref(), Some("{}"));
        assert_eq!(
            b.kv_keys_with_prefix("faultline/schedules/"),
            vec!["faultline/schedules/s1".to_string()]
        );
        assert!(b.kv_remove("faultline/schedules/s1").is_some());
        assert!(a.kv_get("faultline/schedules/s1").is_none());
    }

    #[tokio::test]
    async fn status_propagation_converges_within_budget() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join("node-a");
        cluster.join("node-b");
        propagate_node_status(&a, NodeStatus::Maintenance, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            a.attribute(&a.local_id(), "status").as_deref(),
            Some("MAINTENANCE")
        );
    }

    #[tokio::test]
    async fn status_propagation_times_out_past_the_budget() {
        let cluster = InMemoryCluster::new();
        let a = cluster.join("node-a");
        cluster.set_attribute_lag(Duration::from_secs(5));
        let err = propagate_node_status(&a, NodeStatus::Maintenance, Duration::from_millis(120))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ClusterConvergenceTimeout);
    }
}

//! Cluster-coordinated schedule evaluation and single-fire dispatch.
//!
//! Every node evaluates every schedule locally; only the owning node
//! (lowest-ordered live member) dispatches a firing. A replicated fired
//! marker keyed by schedule id and fire instant keeps an ownership
//! handover from double-dispatching the same tick after a brief
//! partition; the next tick reconciles rather than fails.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule as CronSchedule;
use tracing::{debug, info, warn};

use faultline_common::errors::{ErrorCode, FaultlineError, Result};
use faultline_common::specs::{FaultSpec, SchedulerSpec};
use faultline_common::types::{SchedulerJobType, SchedulerStatus};

use crate::cluster::ClusterCoordinator;

const SCHEDULE_PREFIX: &str = "faultline/schedules/";
const FIRED_PREFIX: &str = "faultline/fired/";
const RESYNC_PREFIX: &str = "faultline/resync/";
/// How far back a freshly armed timer looks for an occurrence it still
/// owes. Bounds the catch-up after a resync or a node (re)start.
const COLD_TIMER_LOOKBACK: Duration = Duration::from_secs(60);

/// Receives the FaultSpec of a due schedule on the owning node. The
/// daemon implementation initializes and spawns the injection task.
pub trait ScheduleDispatcher: Send + Sync {
    fn dispatch(&self, schedule_id: &str, spec: &FaultSpec) -> Result<()>;
}

pub struct Scheduler {
    coordinator: Arc<dyn ClusterCoordinator>,
    dispatcher: Arc<dyn ScheduleDispatcher>,
    /// Next cron fire instant per schedule, local to this node. Each
    /// entry remembers the replicated resync marker it was computed
    /// under; a newer marker invalidates it, so a resync issued on any
    /// member reaches the owner's timer on its next tick.
    next_fire: Mutex<HashMap<String, TimerEntry>>,
}

struct TimerEntry {
    next: DateTime<Utc>,
    resync_marker: Option<String>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<dyn ClusterCoordinator>,
        dispatcher: Arc<dyn ScheduleDispatcher>,
    ) -> Self {
        Self {
            coordinator,
            dispatcher,
            next_fire: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schedule in the replicated space. The id is generated
    /// and returned; firing starts on the next tick.
    pub fn schedule(&self, fault_spec: FaultSpec) -> Result<String> {
        let request = fault_spec.schedule.clone().ok_or_else(|| {
            FaultlineError::with_args(ErrorCode::MissingRequiredField, ["schedule"])
        })?;
        if let SchedulerJobType::Cron(expression) = &request.job_type {
            CronSchedule::from_str(expression).map_err(|e| {
                FaultlineError::with_args(
                    ErrorCode::InvalidCronExpression,
                    [expression.clone(), e.to_string()],
                )
            })?;
        }
        let spec = SchedulerSpec::new(fault_spec, request.job_type);
        self.persist(&spec)?;
        info!(schedule_id = %spec.id, "schedule registered");
        Ok(spec.id)
    }

    pub fn cancel(&self, schedule_id: &str) -> Result<()> {
        let mut spec = self.load(schedule_id)?;
        spec.status = SchedulerStatus::Cancelled;
        self.persist(&spec)?;
        self.forget_timer(schedule_id);
        info!(schedule_id, "schedule cancelled");
        Ok(())
    }

    pub fn pause(&self, schedule_id: &str) -> Result<()> {
        let mut spec = self.load(schedule_id)?;
        if spec.status != SchedulerStatus::Scheduled {
            return Err(FaultlineError::with_args(
                ErrorCode::ScheduleNotActive,
                [schedule_id],
            ));
        }
        spec.status = SchedulerStatus::Paused;
        self.persist(&spec)?;
        self.forget_timer(schedule_id);
        info!(schedule_id, "schedule paused");
        Ok(())
    }

    pub fn resume(&self, schedule_id: &str) -> Result<()> {
        let mut spec = self.load(schedule_id)?;
        if spec.status != SchedulerStatus::Paused {
            return Err(FaultlineError::with_args(
                ErrorCode::ScheduleNotPaused,
                [schedule_id],
            ));
        }
        spec.status = SchedulerStatus::Scheduled;
        self.persist(&spec)?;
        info!(schedule_id, "schedule resumed");
        Ok(())
    }

    /// Reload a schedule's timer on every member. The replicated resync
    /// marker invalidates each node's cached next-fire instant, so the
    /// owner recomputes on its following tick regardless of which node
    /// requested the resync. No tick is lost and no in-flight firing is
    /// duplicated (the fired marker still guards it).
    pub fn resync(&self, schedule_id: &str) -> Result<()> {
        let spec = self.load(schedule_id)?;
        let marker_key = format!("{RESYNC_PREFIX}{}", spec.id);
        let generation = self
            .coordinator
            .kv_get(&marker_key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(1, |g| g + 1);
        self.coordinator.kv_put(&marker_key, &generation.to_string());
        self.forget_timer(&spec.id);
        debug!(schedule_id, "schedule resynchronized");
        Ok(())
    }

    /// Resync every schedule targeting `endpoint_name`, directly or
    /// through a group endpoint containing it.
    pub fn resync_for_endpoint(&self, endpoint_name: &str) -> Result<Vec<String>> {
        let mut resynced = Vec::new();
        for spec in self.all_schedules() {
            if spec.fault_spec.endpoint.covers(endpoint_name) {
                self.resync(&spec.id)?;
                resynced.push(spec.id);
            }
        }
        Ok(resynced)
    }

    pub fn active_schedule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .all_schedules()
            .into_iter()
            .filter(|s| s.status == SchedulerStatus::Scheduled)
            .map(|s| s.id)
            .collect();
        ids.sort();
        ids
    }

    /// Evaluate every schedule against `now` and dispatch the due ones if
    /// this node currently owns the cluster. Returns the ids dispatched
    /// by this node on this tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let is_owner = self.coordinator.is_owner();
        let mut dispatched = Vec::new();
        for mut spec in self.all_schedules() {
            if spec.status != SchedulerStatus::Scheduled {
                continue;
            }
            let Some(fire_instant) = self.due_instant(&spec, now) else {
                continue;
            };
            // Every node observes the firing and advances its timer; only
            // the owner dispatches, and only if no other node already
            // claimed this exact fire instant.
            self.advance_timer(&spec, fire_instant);
            let marker = format!(
                "{FIRED_PREFIX}{}/{}",
                spec.id,
                fire_instant.timestamp_millis()
            );
            if !is_owner || self.coordinator.kv_get(&marker).is_some() {
                continue;
            }
            self.coordinator
                .kv_put(&marker, self.coordinator.local_id().0.as_str());
            match self.dispatcher.dispatch(&spec.id, &spec.fault_spec) {
                Ok(()) => {
                    info!(schedule_id = %spec.id, %fire_instant, "schedule fired");
                    dispatched.push(spec.id.clone());
                }
                Err(err) => {
                    warn!(schedule_id = %spec.id, %err, "schedule dispatch failed");
                }
            }
            if matches!(spec.job_type, SchedulerJobType::Simple(_)) {
                spec.status = SchedulerStatus::Finished;
                if let Err(err) = self.persist(&spec) {
                    warn!(schedule_id = %spec.id, %err, "failed to finish one-shot schedule");
                }
            }
        }
        dispatched
    }

    /// Poll-driven evaluation loop for the daemon.
    pub async fn run_loop(self: Arc<Self>, poll: Duration) {
        loop {
            self.tick(Utc::now());
            tokio::time::sleep(poll).await;
        }
    }

    /// The fire instant due at `now`, if any.
    fn due_instant(&self, spec: &SchedulerSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &spec.job_type {
            SchedulerJobType::Simple(epoch_ms) => {
                let fire = Utc.timestamp_millis_opt(*epoch_ms).single()?;
                (now >= fire).then_some(fire)
            }
            SchedulerJobType::Cron(expression) => {
                let schedule = CronSchedule::from_str(expression).ok()?;
                let marker = self.resync_marker(&spec.id);
                let mut timers = self.next_fire.lock().ok()?;
                let cached = timers
                    .get(&spec.id)
                    .filter(|entry| entry.resync_marker == marker)
                    .map(|entry| entry.next);
                let next = match cached {
                    Some(next) => next,
                    None => {
                        // Cold timer (fresh schedule, post-resync, or a
                        // resync marker written by another member): the
                        // most recent occurrence inside the lookback
                        // window is still owed. The fired marker keeps an
                        // already-claimed instant from firing twice.
                        let lookback = now - chrono::Duration::from_std(COLD_TIMER_LOOKBACK).ok()?;
                        let next = schedule
                            .after(&lookback)
                            .take_while(|instant| *instant <= now)
                            .last()
                            .or_else(|| schedule.after(&now).next())?;
                        timers.insert(
                            spec.id.clone(),
                            TimerEntry {
                                next,
                                resync_marker: marker,
                            },
                        );
                        next
                    }
                };
                (now >= next).then_some(next)
            }
        }
    }

    fn advance_timer(&self, spec: &SchedulerSpec, fired: DateTime<Utc>) {
        if let SchedulerJobType::Cron(expression) = &spec.job_type {
            if let Ok(schedule) = CronSchedule::from_str(expression) {
                if let Some(next) = schedule.after(&fired).next() {
                    let resync_marker = self.resync_marker(&spec.id);
                    if let Ok(mut timers) = self.next_fire.lock() {
                        timers.insert(spec.id.clone(), TimerEntry { next, resync_marker });
                    }
                }
            }
        }
    }

    fn resync_marker(&self, schedule_id: &str) -> Option<String> {
        self.coordinator
            .kv_get(&format!("{RESYNC_PREFIX}{schedule_id}"))
    }

    fn forget_timer(&self, schedule_id: &str) {
        if let Ok(mut timers) = self.next_fire.lock() {
            timers.remove(schedule_id);
        }
    }

    fn persist(&self, spec: &SchedulerSpec) -> Result<()> {
        let json = serde_json::to_string(spec).map_err(|e| {
            FaultlineError::with_args(ErrorCode::InternalSerdeError, [e.to_string()])
        })?;
        self.coordinator
            .kv_put(&format!("{SCHEDULE_PREFIX}{}", spec.id), &json);
        Ok(())
    }

    fn load(&self, schedule_id: &str) -> Result<SchedulerSpec> {
        let json = self
            .coordinator
            .kv_get(&format!("{SCHEDULE_PREFIX}{schedule_id}"))
            .ok_or_else(|| {
                FaultlineError::with_args(ErrorCode::ScheduleNotFound, [schedule_id])
            })?;
        serde_json::from_str(&json).map_err(|_| {
            FaultlineError::with_args(ErrorCode::ResyncFailed, [schedule_id])
        })
    }

    fn all_schedules(&self) -> Vec<SchedulerSpec> {
        self.coordinator
            .kv_keys_with_prefix(SCHEDULE_PREFIX)
            .into_iter()
            .filter_map(|key| {
                let json = self.coordinator.kv_get(&key)?;
                serde_json::from_str(&json).ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use faultline_common::specs::{CredentialsRef, EndpointSpec};
    use faultline_common::types::EndpointType;

    use crate::cluster::InMemoryCluster;

    #[derive(Default)]
    struct CountingDispatcher {
        fired: AtomicUsize,
    }

    impl ScheduleDispatcher for CountingDispatcher {
        fn dispatch(&self, _schedule_id: &str, _spec: &FaultSpec) -> Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn cron_spec(expression: &str) -> FaultSpec {
        FaultSpec::new(
            "cpuFault",
            EndpointSpec::new("svc-01", EndpointType::Process),
            CredentialsRef::new("creds"),
        )
        .arg("load", "30")
        .with_schedule(SchedulerJobType::Cron(expression.to_string()))
    }

    #[test]
    fn invalid_cron_expression_is_rejected_up_front() {
        let cluster = InMemoryCluster::new();
        let scheduler = Scheduler::new(
            Arc::new(cluster.join("node-a")),
            Arc::new(CountingDispatcher::default()),
        );
        let err = scheduler.schedule(cron_spec("not a cron")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCronExpression);
    }

    #[test]
    fn one_shot_fires_once_then_finishes() {
        let cluster = InMemoryCluster::new();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let scheduler = Scheduler::new(Arc::new(cluster.join("node-a")), dispatcher.clone());

        let fire_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let spec = FaultSpec::new(
            "cpuFault",
            EndpointSpec::new("svc-01", EndpointType::Process),
            CredentialsRef::new("creds"),
        )
        .arg("load", "30")
        .with_schedule(SchedulerJobType::Simple(fire_at.timestamp_millis()));
        let id = scheduler.schedule(spec).unwrap();

        let before = fire_at - chrono::Duration::seconds(5);
        assert!(scheduler.tick(before).is_empty());
        assert_eq!(scheduler.tick(fire_at), vec![id.clone()]);
        assert!(scheduler.tick(fire_at + chrono::Duration::seconds(5)).is_empty());
        assert_eq!(dispatcher.fired.load(Ordering::SeqCst), 1);
        assert!(scheduler.active_schedule_ids().is_empty());
    }

    #[test]
    fn pause_suppresses_firing_until_resume() {
        let cluster = InMemoryCluster::new();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let scheduler = Scheduler::new(Arc::new(cluster.join("node-a")), dispatcher.clone());
        let id = scheduler.schedule(cron_spec("* * * * * *")).unwrap();

        scheduler.pause(&id).unwrap();
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(scheduler.tick(t).is_empty());
        assert!(scheduler.active_schedule_ids().is_empty());

        let err = scheduler.pause(&id).unwrap_err();
        assert_eq!(err.code, ErrorCode::ScheduleNotActive);

        scheduler.resume(&id).unwrap();
        assert_eq!(scheduler.active_schedule_ids(), vec![id.clone()]);
        scheduler.tick(t);
        assert_eq!(scheduler.tick(t + chrono::Duration::seconds(1)), vec![id]);
    }

    #[test]
    fn resync_reloads_without_losing_the_next_tick() {
        let cluster = InMemoryCluster::new();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let scheduler = Scheduler::new(Arc::new(cluster.join("node-a")), dispatcher.clone());
        let id = scheduler.schedule(cron_spec("* * * * * *")).unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        scheduler.tick(t0);
        scheduler.resync_for_endpoint("svc-01").unwrap();
        let fired = scheduler.tick(t0 + chrono::Duration::seconds(1));
        assert_eq!(fired, vec![id]);
        assert!(scheduler.resync("missing").is_err());
    }
}

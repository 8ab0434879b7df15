//! The lifecycle manager: wake-on-demand, idle sweep, and startup
//! reconciliation.
//!
//! All three entry points may run concurrently against the same container
//! rows (and across processes). Correctness rests on the store's
//! conditional updates: a transition only takes effect for the caller whose
//! compare-and-swap succeeded, and everyone else observes a no-op — never
//! an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use flotilla_state::{
    ActionKind, ContainerAction, ContainerRecord, ContainerStatus, LifecycleEvent, ProjectRecord,
    SleepStatus, StateResult, StateStore, now_epoch_secs,
};

use crate::bus::EventBus;

/// Hard floor for the per-project idle threshold, seconds.
pub const IDLE_FLOOR_SECONDS: u64 = 60;

/// What an edge wake request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// The container is already running; route traffic to it.
    Awake,
    /// This caller won the transition: a wake action was enqueued and a
    /// `waking` event published.
    WakeQueued,
    /// Another trigger already started the wake; nothing was enqueued.
    AlreadyWaking,
    /// The container is administratively stopped and will not be woken.
    Stopped,
}

impl WakeOutcome {
    /// Whether this outcome enqueued a wake action.
    pub fn queued(&self) -> bool {
        matches!(self, Self::WakeQueued)
    }
}

/// Result of one idle sweep pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Containers examined as sweep candidates.
    pub examined: usize,
    /// Containers actually transitioned to sleeping.
    pub slept: Vec<String>,
}

/// Owns the awake/sleeping/waking state machine.
pub struct LifecycleManager {
    store: StateStore,
    bus: Arc<EventBus>,
}

impl LifecycleManager {
    pub fn new(store: StateStore, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    // ── Edge-triggered wake ────────────────────────────────────────

    /// Handle an inbound request for a container's domain.
    ///
    /// `last_request_at` is refreshed unconditionally on every hit,
    /// best-effort — a failed refresh never masks the wake outcome.
    pub fn request_wake(&self, container_id: &str) -> StateResult<WakeOutcome> {
        let now = now_epoch_secs();
        if let Err(e) = self.store.touch_last_request(container_id, now) {
            warn!(%container_id, error = %e, "last-request refresh failed");
        }

        let container = self
            .store
            .get_container(container_id)?
            .ok_or_else(|| flotilla_state::StateError::NotFound(format!("container {container_id}")))?;

        match (container.status, container.sleep_status) {
            (ContainerStatus::Stopped, _) => Ok(WakeOutcome::Stopped),
            (_, SleepStatus::Awake) => Ok(WakeOutcome::Awake),
            (_, SleepStatus::Waking) => Ok(WakeOutcome::AlreadyWaking),
            (_, SleepStatus::Sleeping) => {
                // Conditional transition: only the caller that flips
                // `sleeping → waking` owns the enqueue and the event.
                if self.store.begin_wake(container_id)? {
                    self.enqueue_wake(&container)?;
                    info!(%container_id, "wake action queued");
                    Ok(WakeOutcome::WakeQueued)
                } else {
                    debug!(%container_id, "lost wake race, another trigger owns it");
                    Ok(WakeOutcome::AlreadyWaking)
                }
            }
        }
    }

    fn enqueue_wake(&self, container: &ContainerRecord) -> StateResult<()> {
        self.store.enqueue_action(&ContainerAction {
            action: ActionKind::Wake,
            container_id: container.id.clone(),
            docker_container_id: container.docker_id.clone(),
            deployment_id: Some(container.deployment_id.clone()),
        })?;
        self.bus.publish(LifecycleEvent::now(
            &container.deployment_id,
            "waking",
            "container is waking up",
        ));
        Ok(())
    }

    // ── Idle sweep ─────────────────────────────────────────────────

    /// One pass of the periodic idle sweep.
    ///
    /// A container is a candidate when it is running and awake, serves its
    /// project's active deployment, the project has sleep enabled, and the
    /// owning organization's plan permits sleep. It is idle once
    /// `now - last_activity >= max(60, sleep_after_seconds)`.
    pub fn sweep(&self) -> StateResult<SweepReport> {
        let now = now_epoch_secs();
        let mut report = SweepReport::default();
        let mut idle_ids = Vec::new();
        let mut by_id: Vec<ContainerRecord> = Vec::new();

        for project in self.store.list_projects()? {
            let Some(candidate) = self.sweep_candidate(&project)? else {
                continue;
            };
            report.examined += 1;

            let threshold = project.sleep_after_seconds.max(IDLE_FLOOR_SECONDS);
            if now.saturating_sub(candidate.last_activity_at()) >= threshold {
                idle_ids.push(candidate.id.clone());
                by_id.push(candidate);
            }
        }

        if idle_ids.is_empty() {
            return Ok(report);
        }

        // Bulk conditional transition; rows raced away by a concurrent wake
        // are skipped by the store and get no sleep action.
        let slept = self.store.sleep_containers(&idle_ids, now)?;
        for container in by_id.iter().filter(|c| slept.contains(&c.id)) {
            self.store.enqueue_action(&ContainerAction {
                action: ActionKind::Sleep,
                container_id: container.id.clone(),
                docker_container_id: container.docker_id.clone(),
                deployment_id: Some(container.deployment_id.clone()),
            })?;
            self.bus.publish(LifecycleEvent::now(
                &container.deployment_id,
                "sleeping",
                "container idle, going to sleep",
            ));
        }

        info!(examined = report.examined, slept = slept.len(), "idle sweep complete");
        report.slept = slept;
        Ok(report)
    }

    /// The container eligible for sweeping under this project, if any.
    fn sweep_candidate(&self, project: &ProjectRecord) -> StateResult<Option<ContainerRecord>> {
        if !project.sleep_enabled {
            return Ok(None);
        }
        let Some(deployment_id) = project.active_deployment_id.as_deref() else {
            return Ok(None);
        };
        let plan_allows = self
            .store
            .get_organization(&project.org_id)?
            .is_some_and(|org| org.plan_allows_sleep);
        if !plan_allows {
            return Ok(None);
        }
        let Some(container) = self.store.container_for_deployment(deployment_id)? else {
            return Ok(None);
        };
        if container.status == ContainerStatus::Running
            && container.sleep_status == SleepStatus::Awake
        {
            Ok(Some(container))
        } else {
            Ok(None)
        }
    }

    // ── Startup reconciliation ─────────────────────────────────────

    /// Re-assert liveness after a process (re)start.
    ///
    /// Persisted sleep state is untrusted across restarts: any container of
    /// an active deployment found sleeping or mid-wake is forced to
    /// `waking` and a wake action is enqueued.
    pub fn reconcile_on_startup(&self) -> StateResult<u32> {
        let mut woken = 0;
        for project in self.store.list_projects()? {
            let Some(deployment_id) = project.active_deployment_id.as_deref() else {
                continue;
            };
            let Some(container) = self.store.container_for_deployment(deployment_id)? else {
                continue;
            };
            let stale = container.status == ContainerStatus::Sleeping
                || matches!(
                    container.sleep_status,
                    SleepStatus::Sleeping | SleepStatus::Waking
                );
            if !stale {
                continue;
            }
            if self.store.force_waking(&container.id)? {
                self.enqueue_wake(&container)?;
                woken += 1;
            }
        }
        if woken > 0 {
            info!(woken, "startup reconciliation re-queued wakes");
        }
        Ok(woken)
    }
}

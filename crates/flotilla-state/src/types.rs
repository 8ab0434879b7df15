//! Domain types for the Flotilla state store.
//!
//! These types mirror the records the control plane persists for servers,
//! projects, deployments, and containers, plus the two wire types exchanged
//! with the execution layer (`ContainerAction`) and with live observers
//! (`LifecycleEvent`). All types are serializable to/from JSON for storage
//! in redb tables.
//!
//! Timestamps on persisted records are epoch seconds; the event wire type
//! carries an ISO-8601 string because that is what subscribers consume.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a server (host).
pub type ServerId = String;

/// Unique identifier for a project.
pub type ProjectId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for a container.
pub type ContainerId = String;

/// Current wall-clock time as epoch seconds.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Server ────────────────────────────────────────────────────────

/// A host that can run containers.
///
/// Capacity counters are mutated by allocation accounting only; the
/// scheduler reads them but never reserves capacity itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub id: ServerId,
    /// Provider region label (e.g. "fsn1").
    pub region: String,
    /// Public IPv4 address used for DNS A records.
    pub address: String,
    pub total_ram_mb: u64,
    pub used_ram_mb: u64,
    pub total_cpu_millis: u64,
    pub used_cpu_millis: u64,
    pub total_bandwidth_gb: u64,
    pub used_bandwidth_gb: u64,
    /// Operator-maintained health score on `[0, 100]`.
    pub health_score: f64,
}

impl ServerInfo {
    pub fn available_ram_mb(&self) -> u64 {
        self.total_ram_mb.saturating_sub(self.used_ram_mb)
    }

    pub fn available_cpu_millis(&self) -> u64 {
        self.total_cpu_millis.saturating_sub(self.used_cpu_millis)
    }

    pub fn available_bandwidth_gb(&self) -> u64 {
        self.total_bandwidth_gb.saturating_sub(self.used_bandwidth_gb)
    }
}

/// A placement ask: the resource shape a workload needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRequest {
    pub ram_mb: u64,
    pub cpu_millicores: u64,
    pub bandwidth_gb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_region: Option<String>,
}

// ── Organization / Project ────────────────────────────────────────

/// The slice of the organization record the orchestrator reads: whether
/// the active plan entitles projects to the sleep cycle at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationRecord {
    pub id: String,
    pub plan_allows_sleep: bool,
}

/// Project-level sleep policy and consumed resource shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub org_id: String,
    pub sleep_enabled: bool,
    /// Idle threshold in seconds; the sweep floors this at 60.
    pub sleep_after_seconds: u64,
    /// Resource shape this project consumes on its server.
    pub ram_mb: u64,
    pub cpu_millis: u64,
    pub bandwidth_gb: u64,
    /// At most one deployment is active per project.
    pub active_deployment_id: Option<DeploymentId>,
}

// ── Deployment ────────────────────────────────────────────────────

/// Target environment of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Preview,
}

/// An immutable build/run record tied to a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    /// Public hostname this deployment serves.
    pub domain: String,
    pub environment: Environment,
    pub created_at: u64,
}

// ── Container ─────────────────────────────────────────────────────

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Creating,
    Running,
    Sleeping,
    Stopped,
}

/// Sleep-cycle position of a container.
///
/// Cycles `awake → sleeping → waking → awake`; `stopped` containers sit
/// outside the cycle entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStatus {
    Awake,
    Sleeping,
    Waking,
}

/// One process instance bound to a deployment.
///
/// Invariant: `status` and `sleep_status` are always written together for
/// sleep/wake transitions; only containers of an active deployment are
/// eligible for wake scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub deployment_id: DeploymentId,
    /// Opaque handle of the external process (docker container id).
    pub docker_id: String,
    pub status: ContainerStatus,
    pub sleep_status: SleepStatus,
    pub last_request_at: Option<u64>,
    pub started_at: Option<u64>,
    pub stopped_at: Option<u64>,
    pub created_at: u64,
}

impl ContainerRecord {
    /// The reference instant idle detection measures against: the most
    /// recent of last request, start, and creation.
    pub fn last_activity_at(&self) -> u64 {
        self.last_request_at
            .unwrap_or(0)
            .max(self.started_at.unwrap_or(0))
            .max(self.created_at)
    }
}

// ── Queue / event wire types ──────────────────────────────────────

/// What the execution worker should do to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Wake,
    Sleep,
}

/// A command handed to the execution layer. Not yet applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAction {
    pub action: ActionKind,
    pub container_id: ContainerId,
    pub docker_container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
}

/// A fact published to live observers. Already applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub deployment_id: DeploymentId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

impl LifecycleEvent {
    /// Build an event stamped with the current time.
    pub fn now(deployment_id: &str, event_type: &str, message: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            event_type: event_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_action_wire_format() {
        let action = ContainerAction {
            action: ActionKind::Wake,
            container_id: "c1".to_string(),
            docker_container_id: "abc123".to_string(),
            deployment_id: Some("d1".to_string()),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "wake");
        assert_eq!(json["containerId"], "c1");
        assert_eq!(json["dockerContainerId"], "abc123");
        assert_eq!(json["deploymentId"], "d1");
    }

    #[test]
    fn container_action_omits_absent_deployment() {
        let action = ContainerAction {
            action: ActionKind::Sleep,
            container_id: "c1".to_string(),
            docker_container_id: "abc123".to_string(),
            deployment_id: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "sleep");
        assert!(json.get("deploymentId").is_none());
    }

    #[test]
    fn lifecycle_event_wire_format() {
        let event = LifecycleEvent::now("d1", "waking", "container is waking");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["deploymentId"], "d1");
        assert_eq!(json["type"], "waking");
        // RFC 3339 timestamps parse back.
        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn last_activity_takes_most_recent() {
        let mut c = ContainerRecord {
            id: "c1".to_string(),
            deployment_id: "d1".to_string(),
            docker_id: "abc".to_string(),
            status: ContainerStatus::Running,
            sleep_status: SleepStatus::Awake,
            last_request_at: Some(500),
            started_at: Some(900),
            stopped_at: None,
            created_at: 100,
        };
        assert_eq!(c.last_activity_at(), 900);
        c.last_request_at = Some(1500);
        assert_eq!(c.last_activity_at(), 1500);
        c.last_request_at = None;
        c.started_at = None;
        assert_eq!(c.last_activity_at(), 100);
    }

    #[test]
    fn server_available_saturates() {
        let server = ServerInfo {
            id: "s1".to_string(),
            region: "fsn1".to_string(),
            address: "10.0.0.1".to_string(),
            total_ram_mb: 1024,
            used_ram_mb: 2048,
            total_cpu_millis: 1000,
            used_cpu_millis: 100,
            total_bandwidth_gb: 100,
            used_bandwidth_gb: 10,
            health_score: 90.0,
        };
        assert_eq!(server.available_ram_mb(), 0);
        assert_eq!(server.available_cpu_millis(), 900);
    }
}

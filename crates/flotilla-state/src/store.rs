//! StateStore — redb-backed state persistence for Flotilla.
//!
//! Provides typed CRUD operations over servers, organizations, projects,
//! deployments, and containers, plus the durable container-action queue.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! # Conditional updates
//!
//! Lifecycle transitions that can be raced by concurrent triggers are
//! implemented as read-compare-write inside a single write transaction.
//! The returned `bool` (or count) plays the role of the affected-row count:
//! `true` means this caller's transition took effect, `false` means another
//! actor got there first and the caller must treat the result as a no-op,
//! not an error.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        txn.open_table(ORGANIZATIONS).map_err(map_err!(Table))?;
        txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Servers ────────────────────────────────────────────────────

    /// Insert or update a server record.
    pub fn put_server(&self, server: &ServerInfo) -> StateResult<()> {
        let value = serde_json::to_vec(server).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            table
                .insert(server.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a server by ID.
    pub fn get_server(&self, server_id: &str) -> StateResult<Option<ServerInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
        match table.get(server_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let server: ServerInfo =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(server))
            }
            None => Ok(None),
        }
    }

    /// List all servers, in key order.
    pub fn list_servers(&self) -> StateResult<Vec<ServerInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let server: ServerInfo =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(server);
        }
        Ok(results)
    }

    /// Reserve capacity for a workload on a server.
    ///
    /// Conditional: only applies if the server still has room for the
    /// request in all three dimensions at write time. Returns `false` when
    /// capacity was consumed by a concurrent allocation in the meantime.
    pub fn reserve_capacity(&self, server_id: &str, req: &WorkloadRequest) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let reserved;
        {
            let mut table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            let mut server: ServerInfo = match table.get(server_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("server {server_id}"))),
            };
            if server.available_ram_mb() >= req.ram_mb
                && server.available_cpu_millis() >= req.cpu_millicores
                && server.available_bandwidth_gb() >= req.bandwidth_gb
            {
                server.used_ram_mb += req.ram_mb;
                server.used_cpu_millis += req.cpu_millicores;
                server.used_bandwidth_gb += req.bandwidth_gb;
                let value = serde_json::to_vec(&server).map_err(map_err!(Serialize))?;
                table
                    .insert(server_id, value.as_slice())
                    .map_err(map_err!(Write))?;
                reserved = true;
            } else {
                reserved = false;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%server_id, reserved, "capacity reservation");
        Ok(reserved)
    }

    /// Return capacity previously reserved for a workload. Invoked by the
    /// host-side worker when it tears a placed workload down.
    pub fn release_capacity(&self, server_id: &str, req: &WorkloadRequest) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            let mut server: ServerInfo = match table.get(server_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("server {server_id}"))),
            };
            server.used_ram_mb = server.used_ram_mb.saturating_sub(req.ram_mb);
            server.used_cpu_millis = server.used_cpu_millis.saturating_sub(req.cpu_millicores);
            server.used_bandwidth_gb = server.used_bandwidth_gb.saturating_sub(req.bandwidth_gb);
            let value = serde_json::to_vec(&server).map_err(map_err!(Serialize))?;
            table
                .insert(server_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Organizations / Projects ───────────────────────────────────

    /// Insert or update an organization record.
    pub fn put_organization(&self, org: &OrganizationRecord) -> StateResult<()> {
        let value = serde_json::to_vec(org).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ORGANIZATIONS).map_err(map_err!(Table))?;
            table
                .insert(org.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get an organization by ID.
    pub fn get_organization(&self, org_id: &str) -> StateResult<Option<OrganizationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ORGANIZATIONS).map_err(map_err!(Table))?;
        match table.get(org_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let org: OrganizationRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(org))
            }
            None => Ok(None),
        }
    }

    /// Insert or update a project record.
    pub fn put_project(&self, project: &ProjectRecord) -> StateResult<()> {
        let value = serde_json::to_vec(project).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            table
                .insert(project.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a project by ID.
    pub fn get_project(&self, project_id: &str) -> StateResult<Option<ProjectRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        match table.get(project_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let project: ProjectRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    /// List all projects.
    pub fn list_projects(&self) -> StateResult<Vec<ProjectRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let project: ProjectRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(project);
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %deployment.id, "deployment stored");
        Ok(())
    }

    /// Get a deployment by ID.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(deployment_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Insert or update a container record.
    pub fn put_container(&self, container: &ContainerRecord) -> StateResult<()> {
        let value = serde_json::to_vec(container).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            table
                .insert(container.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a container by ID.
    pub fn get_container(&self, container_id: &str) -> StateResult<Option<ContainerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        match table.get(container_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let container: ContainerRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(container))
            }
            None => Ok(None),
        }
    }

    /// List all containers.
    pub fn list_containers(&self) -> StateResult<Vec<ContainerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let container: ContainerRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(container);
        }
        Ok(results)
    }

    /// The container serving a deployment, if any.
    pub fn container_for_deployment(
        &self,
        deployment_id: &str,
    ) -> StateResult<Option<ContainerRecord>> {
        Ok(self
            .list_containers()?
            .into_iter()
            .find(|c| c.deployment_id == deployment_id))
    }

    /// Compare-and-swap `sleeping → waking` on a container's sleep status.
    ///
    /// Returns `true` iff the stored value was still `sleeping` — the caller
    /// "won" and owns enqueueing the wake action and publishing the event.
    /// `false` means another trigger already started the wake.
    pub fn begin_wake(&self, container_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let won;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let mut container: ContainerRecord = match table
                .get(container_id)
                .map_err(map_err!(Read))?
            {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("container {container_id}"))),
            };
            if container.sleep_status == SleepStatus::Sleeping {
                container.sleep_status = SleepStatus::Waking;
                let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
                table
                    .insert(container_id, value.as_slice())
                    .map_err(map_err!(Write))?;
                won = true;
            } else {
                won = false;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%container_id, won, "wake transition attempted");
        Ok(won)
    }

    /// Bulk-transition containers to `sleeping`.
    ///
    /// Conditional per container: only rows still `running` + `awake` are
    /// written. Returns the IDs actually transitioned, which is the set the
    /// caller must enqueue sleep actions for.
    pub fn sleep_containers(&self, container_ids: &[String], now: u64) -> StateResult<Vec<String>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut transitioned = Vec::new();
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            for container_id in container_ids {
                let current: Option<ContainerRecord> = match table
                    .get(container_id.as_str())
                    .map_err(map_err!(Read))?
                {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
                let Some(mut container) = current else {
                    continue;
                };
                if container.status == ContainerStatus::Running
                    && container.sleep_status == SleepStatus::Awake
                {
                    container.status = ContainerStatus::Sleeping;
                    container.sleep_status = SleepStatus::Sleeping;
                    container.stopped_at = Some(now);
                    let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
                    table
                        .insert(container_id.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    transitioned.push(container_id.clone());
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = transitioned.len(), "containers put to sleep");
        Ok(transitioned)
    }

    /// Force a container to `sleep_status = waking`, regardless of its
    /// current sleep status. Used by startup reconciliation, which treats
    /// any persisted sleep state as untrusted.
    pub fn force_waking(&self, container_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let current: Option<ContainerRecord> =
                match table.get(container_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            match current {
                Some(mut container) => {
                    container.sleep_status = SleepStatus::Waking;
                    let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
                    table
                        .insert(container_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    found = true;
                }
                None => found = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    /// Mark a container running and awake (wake completed).
    pub fn mark_awake(&self, container_id: &str, now: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let current: Option<ContainerRecord> =
                match table.get(container_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            match current {
                Some(mut container) => {
                    container.status = ContainerStatus::Running;
                    container.sleep_status = SleepStatus::Awake;
                    container.started_at = Some(now);
                    container.stopped_at = None;
                    let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
                    table
                        .insert(container_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    found = true;
                }
                None => found = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    /// Refresh a container's `last_request_at`. Best-effort at the call
    /// site; this method itself still reports store errors.
    pub fn touch_last_request(&self, container_id: &str, now: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let current: Option<ContainerRecord> =
                match table.get(container_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            match current {
                Some(mut container) => {
                    container.last_request_at = Some(now);
                    let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
                    table
                        .insert(container_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    found = true;
                }
                None => found = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    // ── Action queue ───────────────────────────────────────────────

    /// Append a container action to the durable queue. Returns its sequence
    /// number.
    pub fn enqueue_action(&self, action: &ContainerAction) -> StateResult<u64> {
        let value = serde_json::to_vec(action).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            seq = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value().parse::<u64>().unwrap_or(0) + 1,
                None => 1,
            };
            let key = format!("{seq:020}");
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq, action = ?action.action, container_id = %action.container_id, "action enqueued");
        Ok(seq)
    }

    /// Pop the oldest pending action, if any. Consumed by the host-side
    /// action worker that starts and stops docker containers; the
    /// orchestrator only enqueues.
    pub fn dequeue_action(&self) -> StateResult<Option<(u64, ContainerAction)>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let popped;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let head = match table.first().map_err(map_err!(Read))? {
                Some((key, value)) => {
                    let seq = key.value().parse::<u64>().unwrap_or(0);
                    let action: ContainerAction =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    Some((key.value().to_string(), seq, action))
                }
                None => None,
            };
            popped = match head {
                Some((key, seq, action)) => {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                    Some((seq, action))
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(popped)
    }

    /// All pending actions, oldest first. Does not consume them.
    pub fn pending_actions(&self) -> StateResult<Vec<ContainerAction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let action: ContainerAction =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(action);
        }
        Ok(results)
    }
}

//! redb table definitions for the Flotilla state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The action queue table is keyed by a zero-padded sequence number
//! so that iteration order is FIFO.

use redb::TableDefinition;

/// Server records keyed by `{server_id}`.
pub const SERVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("servers");

/// Organization records keyed by `{org_id}`.
pub const ORGANIZATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("organizations");

/// Project records keyed by `{project_id}`.
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Container records keyed by `{container_id}`.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Pending container actions keyed by `{seq:020}` (FIFO on iteration).
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

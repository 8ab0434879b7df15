//! flotilla-edge — HTTP surface for the orchestrator.
//!
//! Provides axum route handlers for the edge wake endpoint (the page a
//! visitor hits while their app is asleep), the placement API, and a live
//! lifecycle event stream.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | any | `/edge/wake/{deployment_id}` | Wake a sleeping container, serve warming response |
//! | POST | `/api/v1/placements` | Select and reserve a server for a workload |
//! | GET | `/api/v1/servers` | List servers |
//! | GET | `/api/v1/deployments/{id}/events` | Live lifecycle events (SSE) |

pub mod handlers;
pub mod warming;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, post};

use flotilla_lifecycle::{EventBus, LifecycleManager};
use flotilla_state::StateStore;

/// Edge behavior knobs from the configuration surface.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Seconds a warming client should wait before retrying.
    pub retry_after_seconds: u32,
    /// Optional shared-secret token; requests must present it when set.
    pub edge_token: Option<String>,
    /// Region substituted into placement requests that carry no preference.
    pub default_region: Option<String>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            retry_after_seconds: 5,
            edge_token: None,
            default_region: None,
        }
    }
}

/// Shared state for edge handlers.
#[derive(Clone)]
pub struct EdgeState {
    pub store: StateStore,
    pub manager: Arc<LifecycleManager>,
    pub bus: Arc<EventBus>,
    pub config: EdgeConfig,
}

/// Build the complete edge router.
pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .route("/edge/wake/{deployment_id}", any(handlers::edge_wake))
        .route("/api/v1/placements", post(handlers::place_workload))
        .route("/api/v1/servers", get(handlers::list_servers))
        .route(
            "/api/v1/deployments/{deployment_id}/events",
            get(handlers::deployment_events),
        )
        .with_state(state)
}

//! Daemon-level API: the provisioning endpoint.
//!
//! Placement and edge wake live in `flotilla-edge`; this module adds the
//! route that drives the full network-provisioning pipeline for a
//! deployment's domain. Validation and capacity problems map to 4xx,
//! external-tool failures to 502 — the caller decides whether to retry the
//! whole pipeline.

use std::net::IpAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use tracing::error;

use flotilla_provision::{ProbeMode, ProvisionError, ProvisionPipeline, ProvisionSpec};
use flotilla_state::StateStore;

/// Shared state for daemon-level handlers.
pub struct DaemonState {
    pub store: StateStore,
    pub pipeline: Arc<ProvisionPipeline>,
    pub probe_mode: ProbeMode,
    pub probe_timeout: u32,
    /// Base domain bare deployment slugs are qualified under.
    pub base_domain: String,
}

/// Qualify a bare deployment slug under the base domain. Fully-qualified
/// names (anything containing a dot) pass through untouched.
fn qualify_domain(domain: &str, base_domain: &str) -> String {
    if domain.contains('.') {
        domain.to_string()
    } else {
        format!("{domain}.{base_domain}")
    }
}

/// Build the daemon-level router.
pub fn build_router(state: Arc<DaemonState>) -> Router {
    Router::new()
        .route("/api/v1/provisions", post(provision_route))
        .with_state(state)
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionRequest {
    /// Bare deployment slug or a fully-qualified domain.
    domain: String,
    #[serde(default)]
    aliases: Vec<String>,
    upstream_host: String,
    upstream_port: u32,
    /// Server whose address the DNS record should point at.
    server_id: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponse {
    domain: String,
    dns_record_id: String,
    ready: bool,
    probe_attempts: u32,
}

fn error_body(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

/// POST /api/v1/provisions — run the proxy/cert/DNS/probe pipeline.
async fn provision_route(
    State(state): State<Arc<DaemonState>>,
    Json(request): Json<ProvisionRequest>,
) -> Response {
    let server = match state.store.get_server(&request.server_id) {
        Ok(Some(server)) => server,
        Ok(None) => {
            return error_body(
                StatusCode::NOT_FOUND,
                format!("server {} not found", request.server_id),
            );
        }
        Err(e) => return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let server_address: IpAddr = match server.address.parse() {
        Ok(addr) => addr,
        Err(_) => {
            return error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("server {} has invalid address {}", server.id, server.address),
            );
        }
    };

    let spec = ProvisionSpec {
        domain: qualify_domain(&request.domain, &state.base_domain),
        aliases: request.aliases,
        upstream_host: request.upstream_host,
        upstream_port: request.upstream_port,
        server_address,
        probe_mode: state.probe_mode,
        probe_timeout_seconds: state.probe_timeout,
    };

    match state.pipeline.provision(&spec).await {
        Ok(report) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "success": true,
                "data": ProvisionResponse {
                    domain: report.domain,
                    dns_record_id: report.dns_record.id,
                    ready: report.probe.ready,
                    probe_attempts: report.probe.attempts,
                },
            })),
        )
            .into_response(),
        Err(e @ ProvisionError::Validation { .. }) => {
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ ProvisionError::Config(_)) => {
            error!(error = %e, "provisioning misconfigured");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "provisioning failed");
            error_body(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_slug_is_qualified_under_base_domain() {
        assert_eq!(qualify_domain("myapp", "flotilla.dev"), "myapp.flotilla.dev");
    }

    #[test]
    fn fully_qualified_domain_passes_through() {
        assert_eq!(qualify_domain("shop.example.com", "flotilla.dev"), "shop.example.com");
        assert_eq!(qualify_domain("myapp.flotilla.dev", "flotilla.dev"), "myapp.flotilla.dev");
    }
}

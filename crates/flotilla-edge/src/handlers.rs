//! Edge HTTP handlers.
//!
//! The wake endpoint is method-agnostic and always answers 503 while a
//! container is not awake, with `Cache-Control: no-store` and `Retry-After`
//! set, degrading gracefully: HEAD gets a bare 503, API clients get a
//! warming JSON body, and browser navigations get the self-refreshing HTML
//! page. Placement failures surface as an explicit insufficient-capacity
//! condition, never a generic fault.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};

use flotilla_lifecycle::WakeOutcome;
use flotilla_placement::{PlacementError, rank_servers};
use flotilla_state::{ServerInfo, WorkloadRequest};

use crate::warming::{accepts_html, is_browser_navigation, sanitize_redirect_path, warming_page};
use crate::EdgeState;

/// Header carrying the optional shared-secret edge token.
const EDGE_TOKEN_HEADER: &str = "x-edge-token";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── Edge wake ──────────────────────────────────────────────────

/// JSON body for warming responses.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct WarmingBody {
    status: &'static str,
    state: &'static str,
    wake_queued: bool,
    retry_after_seconds: u32,
}

/// Headers every warming 503 carries.
fn warming_headers(retry_after_seconds: u32) -> [(header::HeaderName, String); 2] {
    [
        (
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate".to_string(),
        ),
        (header::RETRY_AFTER, retry_after_seconds.to_string()),
    ]
}

fn unavailable(message: &str, retry_after_seconds: u32) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        warming_headers(retry_after_seconds),
        Json(serde_json::json!({ "error": "Unavailable", "message": message })),
    )
        .into_response()
}

/// `any /edge/wake/{deployment_id}` — wake a sleeping container.
pub async fn edge_wake(
    State(state): State<EdgeState>,
    Path(deployment_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let retry = state.config.retry_after_seconds;

    if let Some(expected) = &state.config.edge_token {
        let presented = headers
            .get(EDGE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!(%deployment_id, "edge wake rejected: bad token");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "Forbidden", "message": "invalid edge token" })),
            )
                .into_response();
        }
    }

    let container = match state.store.container_for_deployment(&deployment_id) {
        Ok(Some(container)) => container,
        Ok(None) => return unavailable("deployment has no container attached", retry),
        Err(e) => {
            error!(%deployment_id, error = %e, "container lookup failed");
            return unavailable("deployment state unavailable", retry);
        }
    };

    let outcome = match state.manager.request_wake(&container.id) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(container_id = %container.id, error = %e, "wake request failed");
            return unavailable("wake could not be processed", retry);
        }
    };

    let (container_state, wake_queued) = match outcome {
        WakeOutcome::Awake => {
            // Nothing to warm; the proxy should route straight through.
            return (StatusCode::OK, Json(serde_json::json!({ "status": "awake" })))
                .into_response();
        }
        WakeOutcome::Stopped => {
            return unavailable("deployment has no runnable container", retry);
        }
        WakeOutcome::WakeQueued => ("waking", true),
        WakeOutcome::AlreadyWaking => ("waking", false),
    };

    // HEAD gets headers only.
    if method == Method::HEAD {
        return (StatusCode::SERVICE_UNAVAILABLE, warming_headers(retry)).into_response();
    }

    // Browser navigations get the self-refreshing page; everything else
    // gets machine-readable JSON.
    if method == Method::GET && is_browser_navigation(&headers) && accepts_html(&headers) {
        let path = sanitize_redirect_path(query.get("path").map(String::as_str));
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            warming_headers(retry),
            Html(warming_page(&path, retry)),
        )
            .into_response();
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        warming_headers(retry),
        Json(WarmingBody {
            status: "warming",
            state: container_state,
            wake_queued,
            retry_after_seconds: retry,
        }),
    )
        .into_response()
}

// ── Placement ──────────────────────────────────────────────────

/// POST /api/v1/placements — select and reserve a server for a workload.
///
/// Candidates are tried best-score first; a reservation that loses a
/// capacity race falls through to the next candidate.
pub async fn place_workload(
    State(state): State<EdgeState>,
    Json(mut request): Json<WorkloadRequest>,
) -> Response {
    if request.preferred_region.is_none() {
        request.preferred_region = state.config.default_region.clone();
    }
    let servers = match state.store.list_servers() {
        Ok(servers) => servers,
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };

    let ranked = rank_servers(&servers, &request);
    if ranked.is_empty() {
        let err = PlacementError::NoCapacity {
            ram_mb: request.ram_mb,
            cpu_millicores: request.cpu_millicores,
            bandwidth_gb: request.bandwidth_gb,
        };
        return error_response(&format!("insufficient capacity: {err}"), StatusCode::CONFLICT);
    }

    for score in &ranked {
        match state.store.reserve_capacity(&score.server_id, &request) {
            Ok(true) => {
                let Some(server) = servers.iter().find(|s| s.id == score.server_id).cloned()
                else {
                    continue;
                };
                return (StatusCode::CREATED, ApiResponse::ok(PlacementResult { server }))
                    .into_response();
            }
            Ok(false) => continue,
            Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    error_response(
        "insufficient capacity: all candidates were exhausted by concurrent allocations",
        StatusCode::CONFLICT,
    )
}

#[derive(serde::Serialize)]
struct PlacementResult {
    server: ServerInfo,
}

/// GET /api/v1/servers
pub async fn list_servers(State(state): State<EdgeState>) -> Response {
    match state.store.list_servers() {
        Ok(servers) => ApiResponse::ok(servers).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Events ─────────────────────────────────────────────────────

/// GET /api/v1/deployments/{id}/events — live lifecycle events as SSE.
pub async fn deployment_events(
    State(state): State<EdgeState>,
    Path(deployment_id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe(&deployment_id);
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.event_type.clone()).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use flotilla_lifecycle::{EventBus, LifecycleManager};
    use flotilla_state::{
        ContainerRecord, ContainerStatus, SleepStatus, StateStore,
    };

    use crate::{EdgeConfig, EdgeState, build_router};

    fn edge_state(token: Option<&str>) -> EdgeState {
        let store = StateStore::open_in_memory().unwrap();
        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(LifecycleManager::new(store.clone(), bus.clone()));
        EdgeState {
            store,
            manager,
            bus,
            config: EdgeConfig {
                retry_after_seconds: 5,
                edge_token: token.map(str::to_string),
                default_region: None,
            },
        }
    }

    fn sleeping_container(state: &EdgeState) {
        state
            .store
            .put_container(&ContainerRecord {
                id: "c1".to_string(),
                deployment_id: "d1".to_string(),
                docker_id: "docker-c1".to_string(),
                status: ContainerStatus::Sleeping,
                sleep_status: SleepStatus::Sleeping,
                last_request_at: Some(0),
                started_at: Some(0),
                stopped_at: None,
                created_at: 0,
            })
            .unwrap();
    }

    fn server(id: &str, region: &str, used_ram: u64) -> ServerInfo {
        ServerInfo {
            id: id.to_string(),
            region: region.to_string(),
            address: "203.0.113.7".to_string(),
            total_ram_mb: 8192,
            used_ram_mb: used_ram,
            total_cpu_millis: 8000,
            used_cpu_millis: 1000,
            total_bandwidth_gb: 100,
            used_bandwidth_gb: 10,
            health_score: 95.0,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn wake_navigation_gets_html_warming_page() {
        let state = edge_state(None);
        sleeping_container(&state);
        let app = build_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/edge/wake/d1?path=/checkout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-store, no-cache, must-revalidate"
        );
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
        let body = String::from_utf8(
            response.into_body().collect().await.unwrap().to_bytes().to_vec(),
        )
        .unwrap();
        assert!(body.contains("waking up"));
        assert!(body.contains("/checkout"));

        // The navigation won the race: one wake action queued.
        assert_eq!(state.store.pending_actions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wake_api_client_gets_warming_json() {
        let state = edge_state(None);
        sleeping_container(&state);
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/edge/wake/d1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "warming");
        assert_eq!(json["state"], "waking");
        assert_eq!(json["wakeQueued"], true);
        assert_eq!(json["retryAfterSeconds"], 5);
    }

    #[tokio::test]
    async fn second_wake_reports_not_queued() {
        let state = edge_state(None);
        sleeping_container(&state);
        let app = build_router(state.clone());

        for expected_queued in [true, false] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/edge/wake/d1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let json = body_json(response).await;
            assert_eq!(json["wakeQueued"], expected_queued);
        }
        assert_eq!(state.store.pending_actions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn head_request_gets_bare_503() {
        let state = edge_state(None);
        sleeping_container(&state);
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/edge/wake/d1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn bad_token_is_forbidden() {
        let state = edge_state(Some("secret"));
        sleeping_container(&state);
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/edge/wake/d1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(state.store.pending_actions().unwrap().is_empty());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/edge/wake/d1")
                    .header("x-edge-token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn wake_without_container_is_unavailable() {
        let state = edge_state(None);
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/edge/wake/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Unavailable");
    }

    #[tokio::test]
    async fn placement_reserves_best_server() {
        let state = edge_state(None);
        state.store.put_server(&server("a", "fsn1", 2048)).unwrap();
        state.store.put_server(&server("b", "nbg1", 1024)).unwrap();
        let app = build_router(state.clone());

        let request = serde_json::json!({
            "ramMb": 1024, "cpuMillicores": 500, "bandwidthGb": 25,
            "preferredRegion": "fsn1"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/placements")
                    .header("content-type", "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["data"]["server"]["id"], "a");

        // The allocation was persisted.
        let reserved = state.store.get_server("a").unwrap().unwrap();
        assert_eq!(reserved.used_ram_mb, 2048 + 1024);
    }

    #[tokio::test]
    async fn placement_falls_back_to_default_region() {
        let mut state = edge_state(None);
        state.config.default_region = Some("nbg1".to_string());
        // Identical capacity; only the region bonus can separate them.
        state.store.put_server(&server("a", "fsn1", 2048)).unwrap();
        state.store.put_server(&server("b", "nbg1", 2048)).unwrap();
        let app = build_router(state);

        let request = serde_json::json!({ "ramMb": 1024, "cpuMillicores": 500, "bandwidthGb": 25 });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/placements")
                    .header("content-type", "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["data"]["server"]["id"], "b");
    }

    #[tokio::test]
    async fn placement_without_capacity_is_conflict() {
        let state = edge_state(None);
        state.store.put_server(&server("a", "fsn1", 8000)).unwrap();
        let app = build_router(state);

        let request = serde_json::json!({ "ramMb": 4096, "cpuMillicores": 500, "bandwidthGb": 25 });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/placements")
                    .header("content-type", "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("insufficient capacity"));
    }
}

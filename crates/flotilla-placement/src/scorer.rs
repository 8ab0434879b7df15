//! Server scoring for placement decisions.
//!
//! Evaluates candidate servers using a weighted combination of:
//! - **Free capacity fractions**: RAM (40), CPU (35), bandwidth (10)
//! - **Health score**: operator-maintained, weight 0.15 on `[0, 100]`
//! - **Region bonus**: flat +25 when the server matches the preferred region

use tracing::debug;

use flotilla_state::{ServerInfo, WorkloadRequest};

/// Weight applied to the free-RAM fraction.
const WEIGHT_RAM: f64 = 40.0;
/// Weight applied to the free-CPU fraction.
const WEIGHT_CPU: f64 = 35.0;
/// Weight applied to the free-bandwidth fraction.
const WEIGHT_BANDWIDTH: f64 = 10.0;
/// Weight applied to the raw health score.
const WEIGHT_HEALTH: f64 = 0.15;
/// Flat bonus for matching the requested region.
const REGION_BONUS: f64 = 25.0;

/// Placement failure: no server can fit the request.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("no server has capacity for {ram_mb} MB / {cpu_millicores}m CPU / {bandwidth_gb} GB")]
    NoCapacity {
        ram_mb: u64,
        cpu_millicores: u64,
        bandwidth_gb: u64,
    },
}

/// Scored placement result for a single server.
#[derive(Debug, Clone)]
pub struct ServerScore {
    pub server_id: String,
    /// Composite score (higher = better).
    pub score: f64,
    /// Whether the region bonus applied.
    pub region_matched: bool,
}

fn fraction(available: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        available as f64 / total as f64
    }
}

/// Score a single server for the given request.
///
/// Returns `None` when the server is not a candidate: available RAM, CPU,
/// and bandwidth must each meet or exceed the request.
pub fn score_server(server: &ServerInfo, req: &WorkloadRequest) -> Option<ServerScore> {
    if server.available_ram_mb() < req.ram_mb
        || server.available_cpu_millis() < req.cpu_millicores
        || server.available_bandwidth_gb() < req.bandwidth_gb
    {
        return None;
    }

    let region_matched = req
        .preferred_region
        .as_deref()
        .is_some_and(|r| r == server.region);

    let score = WEIGHT_RAM * fraction(server.available_ram_mb(), server.total_ram_mb)
        + WEIGHT_CPU * fraction(server.available_cpu_millis(), server.total_cpu_millis)
        + WEIGHT_BANDWIDTH * fraction(server.available_bandwidth_gb(), server.total_bandwidth_gb)
        + WEIGHT_HEALTH * server.health_score
        + if region_matched { REGION_BONUS } else { 0.0 };

    Some(ServerScore {
        server_id: server.id.clone(),
        score,
        region_matched,
    })
}

/// Score all candidate servers and return them best first.
///
/// The sort is stable, so equal scores keep their input order — results
/// are deterministic for identical inputs.
pub fn rank_servers(servers: &[ServerInfo], req: &WorkloadRequest) -> Vec<ServerScore> {
    let mut scores: Vec<ServerScore> = servers
        .iter()
        .filter_map(|s| score_server(s, req))
        .collect();

    scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scores
}

/// Select the best server for a request.
///
/// Fails with [`PlacementError::NoCapacity`] when no server passes the
/// capacity filter — distinct from a low score, which still places.
pub fn pick_best_server<'a>(
    servers: &'a [ServerInfo],
    req: &WorkloadRequest,
) -> Result<&'a ServerInfo, PlacementError> {
    let ranked = rank_servers(servers, req);
    let best = ranked.first().ok_or(PlacementError::NoCapacity {
        ram_mb: req.ram_mb,
        cpu_millicores: req.cpu_millicores,
        bandwidth_gb: req.bandwidth_gb,
    })?;

    debug!(
        server_id = %best.server_id,
        score = best.score,
        region_matched = best.region_matched,
        candidates = ranked.len(),
        "server selected"
    );

    // The id came from this slice; the lookup cannot fail.
    Ok(servers
        .iter()
        .find(|s| s.id == best.server_id)
        .expect("ranked server missing from input"))
}

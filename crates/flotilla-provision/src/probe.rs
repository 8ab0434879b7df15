//! Readiness probing.
//!
//! Polls a freshly provisioned domain at 1-second intervals until it is
//! reachable or the attempt budget runs out. HTTP and HTTPS are probed
//! independently on every attempt; because public DNS may not have
//! propagated yet, the probe pins the domain to the origin address and
//! skips TLS verification.
//!
//! Readiness is advisory: running out of budget returns the last
//! observation instead of erroring.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};

/// Delay between attempts.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);
/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Status codes that do not count as reachable. `0` stands for a
/// connection-level failure (curl's `000`).
const UNREACHABLE_STATUSES: [u16; 4] = [0, 502, 503, 504];

/// Which probes must succeed for the route to count as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// Either protocol reachable is enough.
    #[default]
    Either,
    /// HTTP must be reachable.
    Http,
    /// HTTPS must be reachable.
    Https,
}

impl FromStr for ProbeMode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "either" => Ok(Self::Either),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(ProvisionError::Config(format!(
                "unknown probe mode '{other}' (expected either|http|https)"
            ))),
        }
    }
}

/// Statuses observed by one probe attempt. `0` means the connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeObservation {
    pub http_status: u16,
    pub https_status: u16,
}

impl ProbeObservation {
    fn reachable(status: u16) -> bool {
        !UNREACHABLE_STATUSES.contains(&status)
    }

    /// Whether this observation satisfies the given mode.
    pub fn ready(&self, mode: ProbeMode) -> bool {
        let http = Self::reachable(self.http_status);
        let https = Self::reachable(self.https_status);
        match mode {
            ProbeMode::Either => http || https,
            ProbeMode::Http => http,
            ProbeMode::Https => https,
        }
    }
}

/// Final result of a probe run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub ready: bool,
    pub attempts: u32,
    pub last: ProbeObservation,
}

async fn status_of(client: &reqwest::Client, url: &str) -> u16 {
    match client.get(url).send().await {
        Ok(response) => response.status().as_u16(),
        Err(_) => 0,
    }
}

/// Probe `domain` until ready or until `timeout_seconds` attempts elapse.
///
/// `origin` pins the domain to a specific address so the probe works before
/// public DNS resolves; `port` overrides the default ports (for tests).
pub async fn probe_until_ready(
    domain: &str,
    origin: Option<IpAddr>,
    mode: ProbeMode,
    timeout_seconds: u32,
) -> ProvisionResult<ProbeOutcome> {
    probe_with_ports(domain, origin, mode, timeout_seconds, 80, 443).await
}

pub(crate) async fn probe_with_ports(
    domain: &str,
    origin: Option<IpAddr>,
    mode: ProbeMode,
    timeout_seconds: u32,
    http_port: u16,
    https_port: u16,
) -> ProvisionResult<ProbeOutcome> {
    let budget = timeout_seconds.max(1);

    let mut http_builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
    let mut https_builder = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(true);
    if let Some(addr) = origin {
        // Port 0 defers to the URL's port.
        http_builder = http_builder.resolve(domain, SocketAddr::new(addr, 0));
        https_builder = https_builder.resolve(domain, SocketAddr::new(addr, 0));
    }
    let http_client = http_builder.build()?;
    let https_client = https_builder.build()?;

    let http_url = format!("http://{domain}:{http_port}/");
    let https_url = format!("https://{domain}:{https_port}/");

    let mut last = ProbeObservation {
        http_status: 0,
        https_status: 0,
    };

    for attempt in 1..=budget {
        last = ProbeObservation {
            http_status: status_of(&http_client, &http_url).await,
            https_status: status_of(&https_client, &https_url).await,
        };

        // Log the first attempt, every 5th, and the last — never all of them.
        if attempt == 1 || attempt % 5 == 0 || attempt == budget {
            info!(
                %domain,
                attempt,
                budget,
                http = last.http_status,
                https = last.https_status,
                "readiness probe"
            );
        }

        if last.ready(mode) {
            return Ok(ProbeOutcome {
                ready: true,
                attempts: attempt,
                last,
            });
        }
        if attempt < budget {
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    Ok(ProbeOutcome {
        ready: false,
        attempts: budget,
        last,
    })
}

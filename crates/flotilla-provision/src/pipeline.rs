//! The provisioning pipeline: validate → (proxy ∥ DNS) → certificate →
//! readiness probe.
//!
//! Proxy configuration must be live before certificate issuance, since the
//! issuer validates domain ownership through the proxy. The DNS upsert has
//! no ordering dependency and runs concurrently with the proxy step.
//! Provisioning different domains never serializes against each other —
//! the pipeline holds no locks.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cert::CertAdapter;
use crate::dns::{DnsAdapter, DnsRecord};
use crate::domain::validate_hostname;
use crate::error::ProvisionResult;
use crate::probe::{ProbeMode, ProbeOutcome, probe_until_ready};
use crate::proxy::ProxyAdapter;

/// Everything needed to provision one route.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub domain: String,
    pub aliases: Vec<String>,
    /// Upstream the proxy forwards to (the container's host-side endpoint).
    pub upstream_host: String,
    pub upstream_port: u32,
    /// Public address of the server the DNS record should point at.
    pub server_address: IpAddr,
    pub probe_mode: ProbeMode,
    /// Probe attempt budget in seconds.
    pub probe_timeout_seconds: u32,
}

/// What a completed pipeline run produced.
#[derive(Debug)]
pub struct ProvisionReport {
    pub domain: String,
    pub dns_record: DnsRecord,
    pub probe: ProbeOutcome,
}

/// Sequences the adapters into a working HTTP(S) route.
pub struct ProvisionPipeline {
    proxy: Arc<ProxyAdapter>,
    cert: Arc<CertAdapter>,
    dns: Arc<DnsAdapter>,
}

impl ProvisionPipeline {
    pub fn new(proxy: Arc<ProxyAdapter>, cert: Arc<CertAdapter>, dns: Arc<DnsAdapter>) -> Self {
        Self { proxy, cert, dns }
    }

    /// Run the full pipeline for one domain.
    ///
    /// Validation rejects bad input before any side effect. Adapter
    /// failures abort the run; nothing here retries. The readiness probe
    /// cannot fail the run — an unready route is reported, not thrown.
    pub async fn provision(&self, spec: &ProvisionSpec) -> ProvisionResult<ProvisionReport> {
        let domain = validate_hostname("domain", &spec.domain)?;
        let mut aliases = Vec::with_capacity(spec.aliases.len());
        for alias in &spec.aliases {
            aliases.push(validate_hostname("alias", alias)?);
        }

        let address = spec.server_address.to_string();
        let (proxy_result, dns_result) = tokio::join!(
            self.proxy
                .install(&domain, &aliases, &spec.upstream_host, spec.upstream_port),
            self.dns.upsert_a_record(&domain, &address),
        );
        proxy_result?;
        let dns_record = dns_result?;

        // The proxy is live; the issuer can now validate ownership.
        self.cert.issue(&domain, &aliases).await?;

        let probe = probe_until_ready(
            &domain,
            Some(spec.server_address),
            spec.probe_mode,
            spec.probe_timeout_seconds,
        )
        .await?;

        if probe.ready {
            info!(%domain, attempts = probe.attempts, "route provisioned and reachable");
        } else {
            warn!(
                %domain,
                http = probe.last.http_status,
                https = probe.last.https_status,
                "route provisioned but not yet reachable"
            );
        }

        Ok(ProvisionReport {
            domain,
            dns_record,
            probe,
        })
    }
}

//! Flotilla network provisioning — reverse proxy, TLS issuance, DNS upsert,
//! and readiness probing.
//!
//! Given a validated domain, optional aliases, and an upstream `(host, port)`
//! pair, this crate produces a working HTTP(S) route:
//!
//! 1. **`domain`** — hostname normalization and grammar validation
//! 2. **`proxy`** — render the reverse-proxy config from a template,
//!    validate it, and reload the proxy
//! 3. **`cert`** — issue/expand a TLS certificate over the domain set
//! 4. **`dns`** — find-or-create the A record at the DNS provider
//! 5. **`probe`** — bounded-retry reachability check (advisory)
//!
//! All privileged operations go through **`exec`**, which transparently hops
//! into the host's namespaces when the orchestrator itself runs inside a
//! container. The **`pipeline`** module sequences the steps: proxy config is
//! applied before certificate issuance (issuance validates ownership through
//! the live proxy), while the DNS upsert has no ordering dependency and runs
//! concurrently with the proxy step.
//!
//! No step retries internally. A failure is fatal to the provisioning
//! attempt and retrying the whole pipeline is the caller's decision.

pub mod cert;
pub mod dns;
pub mod domain;
pub mod error;
pub mod exec;
pub mod pipeline;
pub mod probe;
pub mod proxy;

pub use cert::CertAdapter;
pub use dns::{DnsAdapter, DnsRecord};
pub use domain::{normalize_hostname, validate_hostname};
pub use error::{ProvisionError, ProvisionResult};
pub use exec::{BoxFuture, HostExecutor, ShellExecutor};
pub use pipeline::{ProvisionPipeline, ProvisionReport, ProvisionSpec};
pub use probe::{ProbeMode, ProbeOutcome, probe_until_ready};
pub use proxy::ProxyAdapter;

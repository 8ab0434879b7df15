//! flotillad — the Flotilla orchestrator daemon.
//!
//! Single binary that assembles the orchestrator subsystems:
//! - State store (redb)
//! - Lifecycle manager + event bus
//! - Idle sweep loop
//! - Startup reconciliation
//! - Provisioning pipeline (proxy, certificates, DNS, readiness)
//! - Edge + placement HTTP API
//!
//! # Usage
//!
//! ```text
//! flotillad run --port 8088 --data-dir /var/lib/flotilla \
//!     --cert-contact ops@example.com
//! ```
//!
//! Every flag can also come from the environment (`FLOTILLA_*`).

mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use flotilla_edge::{EdgeConfig, EdgeState};
use flotilla_lifecycle::{EventBus, LifecycleManager};
use flotilla_provision::{
    CertAdapter, DnsAdapter, HostExecutor, ProbeMode, ProvisionPipeline, ProxyAdapter,
    ShellExecutor,
};
use flotilla_state::StateStore;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Port the HTTP API listens on.
    #[arg(long, env = "FLOTILLA_PORT", default_value = "8088")]
    port: u16,

    /// Data directory for persistent state.
    #[arg(long, env = "FLOTILLA_DATA_DIR", default_value = "/var/lib/flotilla")]
    data_dir: PathBuf,

    /// Base domain deployments are exposed under.
    #[arg(long, env = "FLOTILLA_BASE_DOMAIN", default_value = "flotilla.dev")]
    base_domain: String,

    /// Directory the reverse proxy loads per-domain configs from.
    #[arg(long, env = "FLOTILLA_PROXY_CONFIG_DIR", default_value = "/etc/nginx/conf.d")]
    proxy_config_dir: PathBuf,

    /// Optional proxy template override path.
    #[arg(long, env = "FLOTILLA_PROXY_TEMPLATE")]
    proxy_template: Option<PathBuf>,

    /// Contact address registered with the certificate issuer.
    #[arg(long, env = "FLOTILLA_CERT_CONTACT")]
    cert_contact: Option<String>,

    /// DNS provider API base URL.
    #[arg(long, env = "FLOTILLA_DNS_API_BASE", default_value = "https://api.cloudflare.com/client/v4")]
    dns_api_base: String,

    /// DNS zone identifier.
    #[arg(long, env = "FLOTILLA_DNS_ZONE_ID", default_value = "")]
    dns_zone_id: String,

    /// DNS provider API token.
    #[arg(long, env = "FLOTILLA_DNS_API_TOKEN", default_value = "")]
    dns_api_token: String,

    /// Default region for placements without a preference.
    #[arg(long, env = "FLOTILLA_DEFAULT_REGION", default_value = "fsn1")]
    default_region: String,

    /// Idle sweep interval in seconds.
    #[arg(long, env = "FLOTILLA_SWEEP_INTERVAL", default_value = "60")]
    sweep_interval: u64,

    /// Readiness probe mode: either, http, or https.
    #[arg(long, env = "FLOTILLA_PROBE_MODE", default_value = "either")]
    probe_mode: String,

    /// Readiness probe attempt budget in seconds.
    #[arg(long, env = "FLOTILLA_PROBE_TIMEOUT", default_value = "30")]
    probe_timeout: u32,

    /// Seconds warming clients should wait before retrying.
    #[arg(long, env = "FLOTILLA_EDGE_RETRY_AFTER", default_value = "5")]
    edge_retry_after: u32,

    /// Optional shared-secret token required on edge wake requests.
    #[arg(long, env = "FLOTILLA_EDGE_TOKEN")]
    edge_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotillad=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!("Flotilla orchestrator starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join("flotilla.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let bus = Arc::new(EventBus::new());
    let manager = Arc::new(LifecycleManager::new(store.clone(), bus.clone()));

    let executor: Arc<dyn HostExecutor> = Arc::new(ShellExecutor::new());
    let pipeline = Arc::new(ProvisionPipeline::new(
        Arc::new(ProxyAdapter::new(
            executor.clone(),
            args.proxy_config_dir.clone(),
            args.proxy_template.clone(),
        )),
        Arc::new(CertAdapter::new(executor.clone(), args.cert_contact.clone())),
        Arc::new(DnsAdapter::new(
            args.dns_api_base.clone(),
            args.dns_zone_id.clone(),
            args.dns_api_token.clone(),
        )),
    ));
    let probe_mode: ProbeMode = args.probe_mode.parse()?;
    info!("provisioning pipeline initialized");

    // ── Startup reconciliation ─────────────────────────────────

    // Persisted sleep state is untrusted after a restart.
    match manager.reconcile_on_startup() {
        Ok(woken) => info!(woken, "startup reconciliation complete"),
        Err(e) => warn!(error = %e, "startup reconciliation failed"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Idle sweep loop ────────────────────────────────────────

    let sweep_manager = manager.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    let sweep_interval = Duration::from_secs(args.sweep_interval.max(1));
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_manager.sweep() {
                        warn!(error = %e, "idle sweep failed");
                    }
                }
                _ = sweep_shutdown.changed() => {
                    info!("idle sweep stopping");
                    break;
                }
            }
        }
    });

    // ── HTTP API ───────────────────────────────────────────────

    let edge_state = EdgeState {
        store: store.clone(),
        manager,
        bus,
        config: EdgeConfig {
            retry_after_seconds: args.edge_retry_after,
            edge_token: args.edge_token.clone(),
            default_region: Some(args.default_region.clone()),
        },
    };
    let daemon = Arc::new(api::DaemonState {
        store,
        pipeline,
        probe_mode,
        probe_timeout: args.probe_timeout,
        base_domain: args.base_domain.clone(),
    });

    let router = flotilla_edge::build_router(edge_state).merge(api::build_router(daemon));
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    info!(%addr, base_domain = %args.base_domain, "HTTP API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = sweep_handle.await;

    info!("Flotilla orchestrator stopped");
    Ok(())
}

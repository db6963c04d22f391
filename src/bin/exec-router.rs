use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use exec_router::config::RouterConfig;
use exec_router::utils::logging;
use exec_router::{server, ExecRouter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "EXEC_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the route tree
    #[arg(long, env = "EXEC_ROUTER_SITE_ROOT")]
    site_root: Option<PathBuf>,

    /// Parent directory of per-route storage
    #[arg(long, env = "EXEC_ROUTER_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "EXEC_ROUTER_BIND")]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long, env = "EXEC_ROUTER_PORT")]
    port: Option<u16>,

    /// Per-invocation time limit in milliseconds
    #[arg(long, env = "EXEC_ROUTER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Runtime worker threads
    #[arg(long, env = "EXEC_ROUTER_WORKERS")]
    workers: Option<usize>,

    /// Watch the route tree and invalidate cached routes on change
    #[arg(long, env = "EXEC_ROUTER_WATCH")]
    watch: bool,

    /// Disable the route cache
    #[arg(long, env = "EXEC_ROUTER_NO_CACHE")]
    no_cache: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "EXEC_ROUTER_LOG", default_value = "info")]
    log_filter: String,
}

impl Cli {
    /// Layer command-line and environment overrides over the file configuration
    fn into_config(self) -> Result<RouterConfig> {
        let mut config = match &self.config {
            Some(path) => RouterConfig::from_file(path)?,
            None => RouterConfig::default(),
        };

        if let Some(site_root) = self.site_root {
            config.routes.site_root = site_root;
        }
        if let Some(storage_root) = self.storage_root {
            config.sandbox.storage_root = storage_root;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.limits.timeout_ms = timeout_ms;
        }
        if let Some(workers) = self.workers {
            config.server.worker_threads = Some(workers);
        }
        if self.watch {
            config.routes.watch_routes = true;
        }
        if self.no_cache {
            config.routes.cache_enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_with_filter(&cli.log_filter);

    let config = cli.into_config().context("invalid configuration")?;
    let workers = config.server.worker_threads.unwrap_or_else(num_cpus::get);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;

    runtime.block_on(run(config, workers))
}

async fn run(config: RouterConfig, workers: usize) -> Result<()> {
    let addr = config.bind_addr();
    let router = Arc::new(ExecRouter::new(config)?);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, workers, "Starting exec-router");

    server::serve(listener, router.app()).await?;

    let stats = router.stats();
    info!(
        total = stats.total_requests,
        failed = stats.failed,
        "Served {} requests",
        stats.total_requests
    );
    Ok(())
}

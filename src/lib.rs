//! # exec-router
//!
//! An HTTP front end that maps each request path to a standalone executable in
//! a file-system route tree and runs it as an isolated child process.
//!
//! ## Primary Goals
//!
//! 1. **Isolation**: Every request runs in a fresh process; a crashing or hanging route cannot affect another
//! 2. **Scoped sharing**: Shared components are visible only at and below their directory level
//! 3. **Safety**: Traversal is rejected before touching the file system and paths never escape the site root
//! 4. **Resource Control**: Time and output limits per invocation, with forced termination
//! 5. **Ease of Use**: A single [`ExecRouter`] facade with sensible defaults

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::redundant_closure)]

// Re-export common types and traits
pub mod error;
pub use error::{Error, ErrorKind, InvocationId, Result, RouterError};

pub mod communication;
pub mod config;
pub mod message;
pub mod monitoring;
pub mod routing;
pub mod runtime;
pub mod security;
pub mod server;
pub mod utils;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use config::RouterConfig;
use message::Context;
use monitoring::{InvocationMonitor, InvocationStats};
use routing::{CacheStats, RouteCache, RouteEntry, RouteLookup, RouteResolver};
use security::SandboxContext;
use utils::logging;

pub use message::{HttpMethod, Request, Response};
pub use runtime::{ProcessExecutor, RouteInvoker};

/// Statistics key for requests rejected before a route was resolved
const UNRESOLVED_ROUTE: &str = "-";

/// Resolution and sandbox preparation; runs on the blocking pool
struct Preparer {
    lookup: RouteLookup,
    sandbox: SandboxContext,
}

impl Preparer {
    fn prepare(&self, route_path: &str) -> Result<(Arc<RouteEntry>, Context)> {
        let entry = self.lookup.lookup(route_path)?;
        let context = self.sandbox.build(&entry.route_path, &entry.resource_paths)?;
        Ok((entry, context))
    }
}

/// Main router: resolves, prepares and executes one route per request
pub struct ExecRouter {
    config: RouterConfig,
    preparer: Arc<Preparer>,
    executor: ProcessExecutor,
    monitor: InvocationMonitor,
}

impl ExecRouter {
    /// Create a router from a validated configuration
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let resolver = RouteResolver::new(&config.routes.site_root)?;
        let sandbox = SandboxContext::new(resolver.site_root(), &config.sandbox.storage_root)?;

        let lookup = if config.routes.cache_enabled {
            let cache = Arc::new(RouteCache::new(config.cache_ttl()));
            RouteLookup::cached(resolver, cache, config.routes.watch_routes)?
        } else {
            RouteLookup::uncached(resolver)
        };

        let executor = ProcessExecutor::new(config.limits(), config.sandbox.environment.clone());

        info!(
            site_root = ?lookup.resolver().site_root(),
            storage_root = ?sandbox.storage_root(),
            cache = config.routes.cache_enabled,
            timeout_ms = config.limits.timeout_ms,
            "Router initialized"
        );

        Ok(Self {
            config,
            preparer: Arc::new(Preparer { lookup, sandbox }),
            executor,
            monitor: InvocationMonitor::new(),
        })
    }

    /// Resolve, prepare and execute; errors are returned as-is
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let preparer = Arc::clone(&self.preparer);
        let route_path = request.path().to_string();

        let (entry, context) = tokio::task::spawn_blocking(move || preparer.prepare(&route_path))
            .await
            .map_err(|e| anyhow::anyhow!("route preparation task failed: {}", e))??;

        let request = request.with_context(context);
        self.executor.execute(&entry, &request).await
    }

    /// Serve one request, rendering any failure as a generic error page
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().to_string();
        let path = request.path().to_string();
        let invocation_id = request.invocation_id();

        let (response, outcome, route_key) = match self.dispatch(request).await {
            Ok(response) => (response, "completed", path.as_str()),
            Err(e) => {
                logging::log_error("router", &e);
                let kind = e.kind();
                let route_key = if kind.is_pre_execution() {
                    UNRESOLVED_ROUTE
                } else {
                    path.as_str()
                };
                (Response::error_page(e.status_code(), e.public_message()), kind.as_str(), route_key)
            }
        };

        let elapsed = started.elapsed();
        self.monitor
            .record(route_key, outcome, outcome == "completed", elapsed);
        logging::log_request_outcome(&method, &path, response.status(), outcome, elapsed, invocation_id);

        response
    }

    /// HTTP application serving this router
    pub fn app(self: &Arc<Self>) -> axum::Router {
        server::router(Arc::clone(self) as Arc<dyn RouteInvoker>, self.config.server.max_body_bytes)
    }

    /// Invocation statistics snapshot
    pub fn stats(&self) -> InvocationStats {
        self.monitor.snapshot()
    }

    /// Route cache statistics, when caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.preparer.lookup.cache().map(RouteCache::stats)
    }

    /// Drop every cached resolution
    pub fn invalidate_routes(&self) {
        if let Some(cache) = self.preparer.lookup.cache() {
            cache.invalidate_all();
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }
}

#[async_trait]
impl RouteInvoker for ExecRouter {
    async fn invoke(&self, request: Request) -> Response {
        self.handle(request).await
    }
}

impl std::fmt::Debug for ExecRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecRouter")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

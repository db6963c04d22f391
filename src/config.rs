//! Router configuration with ergonomic builders and human-readable units

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::security::{EnvironmentCapability, ResourceLimits};

/// Human-readable memory units
pub trait MemoryUnit {
    fn bytes(self) -> u64;
    fn kb(self) -> u64;
    fn mb(self) -> u64;
    fn gb(self) -> u64;
}

impl MemoryUnit for u64 {
    fn bytes(self) -> u64 { self }
    fn kb(self) -> u64 { self * 1024 }
    fn mb(self) -> u64 { self * 1024 * 1024 }
    fn gb(self) -> u64 { self * 1024 * 1024 * 1024 }
}

/// Human-readable time units
pub trait TimeUnit {
    fn millis(self) -> Duration;
    fn seconds(self) -> Duration;
    fn minutes(self) -> Duration;
}

impl TimeUnit for u64 {
    fn millis(self) -> Duration { Duration::from_millis(self) }
    fn seconds(self) -> Duration { Duration::from_secs(self) }
    fn minutes(self) -> Duration { Duration::from_secs(self * 60) }
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: IpAddr,
    pub port: u16,

    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,

    /// Runtime worker threads; the CPU count when unset
    pub worker_threads: Option<usize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            worker_threads: None,
        }
    }
}

/// `[routes]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesSection {
    pub site_root: PathBuf,
    pub cache_enabled: bool,

    /// Upper bound on the age of a cached resolution
    pub cache_ttl_secs: Option<u64>,

    /// Invalidate the cache when the site tree changes
    pub watch_routes: bool,
}

impl Default for RoutesSection {
    fn default() -> Self {
        Self {
            site_root: PathBuf::from("site"),
            cache_enabled: true,
            cache_ttl_secs: Some(60),
            watch_routes: false,
        }
    }
}

/// `[sandbox]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Parent of every per-route storage directory
    pub storage_root: PathBuf,
    pub environment: EnvironmentCapability,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            environment: EnvironmentCapability::default(),
        }
    }
}

/// `[limits]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            timeout_ms: limits.timeout.as_millis() as u64,
            max_output_bytes: limits.max_output_bytes,
            max_stderr_bytes: limits.max_stderr_bytes,
        }
    }
}

/// Complete router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub server: ServerSection,
    pub routes: RoutesSection,
    pub sandbox: SandboxSection,
    pub limits: LimitsSection,
}

impl RouterConfig {
    /// Create a new builder
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::new()
    }

    /// Load a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RouterError::config_error(
                format!("Cannot read configuration file {:?}: {}", path, e),
                Some("Check the --config path".to_string()),
            )
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            RouterError::config_error(format!("Invalid configuration: {}", e), None)
        })
    }

    /// Address the server listens on
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    /// Per-invocation limits for the executor
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: Duration::from_millis(self.limits.timeout_ms),
            max_output_bytes: self.limits.max_output_bytes,
            max_stderr_bytes: self.limits.max_stderr_bytes,
        }
    }

    /// Maximum age of a cached route, if bounded
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.routes.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limits.timeout_ms == 0 {
            return Err(RouterError::config_field_error(
                "limits.timeout_ms",
                "Timeout cannot be zero",
                Some("Use a positive number of milliseconds".to_string()),
            ));
        }

        if self.limits.max_output_bytes == 0 {
            return Err(RouterError::config_field_error(
                "limits.max_output_bytes",
                "Output limit cannot be zero",
                None,
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(RouterError::config_field_error(
                "server.max_body_bytes",
                "Body limit cannot be zero",
                None,
            ));
        }

        if self.server.worker_threads == Some(0) {
            return Err(RouterError::config_field_error(
                "server.worker_threads",
                "Worker thread count cannot be zero",
                Some("Leave it unset to use one thread per CPU".to_string()),
            ));
        }

        if !self.routes.site_root.is_dir() {
            return Err(RouterError::config_field_error(
                "routes.site_root",
                format!("Site root is not a directory: {:?}", self.routes.site_root),
                Some("Point routes.site_root at the route tree".to_string()),
            ));
        }

        if let Ok(storage) = self.sandbox.storage_root.canonicalize() {
            if let Ok(site) = self.routes.site_root.canonicalize() {
                if storage.starts_with(&site) {
                    return Err(RouterError::config_field_error(
                        "sandbox.storage_root",
                        "Storage root must not live inside the site root",
                        Some("Route processes would be able to plant executables".to_string()),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Builder for RouterConfig with ergonomic APIs
#[derive(Debug, Clone, Default)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    /// Create a new router config builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.routes.site_root = path.into();
        self
    }

    pub fn storage_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sandbox.storage_root = path.into();
        self
    }

    pub fn bind(mut self, addr: IpAddr) -> Self {
        self.config.server.bind = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set timeout using human-readable duration
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.limits.timeout_ms = duration.as_millis() as u64;
        self
    }

    /// Set the output limit using human-readable units
    pub fn max_output<T: MemoryUnit>(mut self, amount: T) -> Self {
        self.config.limits.max_output_bytes = amount.bytes() as usize;
        self
    }

    /// Set the request body limit using human-readable units
    pub fn max_body<T: MemoryUnit>(mut self, amount: T) -> Self {
        self.config.server.max_body_bytes = amount.bytes() as usize;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.server.worker_threads = Some(threads);
        self
    }

    /// Enable or disable the route cache
    pub fn cache(mut self, enabled: bool) -> Self {
        self.config.routes.cache_enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.routes.cache_ttl_secs = ttl.map(|t| t.as_secs());
        self
    }

    pub fn watch_routes(mut self, watch: bool) -> Self {
        self.config.routes.watch_routes = watch;
        self
    }

    /// Allow access to specific environment variables
    pub fn env_vars(mut self, vars: &[impl AsRef<str>]) -> Self {
        self.config.sandbox.environment =
            EnvironmentCapability::Allowlist(vars.iter().map(|v| v.as_ref().to_string()).collect());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RouterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

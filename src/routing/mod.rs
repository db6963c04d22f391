//! Route resolution over a file-system route tree
//!
//! Every URL path maps to exactly one executable in the tree rooted at the
//! site root. A path `/a/b` resolves to the file `a/b`, or to `a/b/index`
//! when `a/b` is a directory; `/` resolves to `index`. Each directory level
//! may carry a `shared/` directory that is visible only to executables at or
//! below that level.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, RouterError};

pub mod cache;
pub mod watch;

pub use cache::{CacheStats, RouteCache};
pub use watch::RouteWatcher;

/// File name of a directory's own executable
pub const INDEX_NAME: &str = "index";

/// Directory name holding scoped shared components
pub const SHARED_DIR: &str = "shared";

/// A resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Normalized logical path
    pub route_path: String,

    /// Absolute path of the executable
    pub executable: PathBuf,

    /// Existing shared directories visible to the executable, most specific first
    pub resource_paths: Vec<PathBuf>,
}

/// Normalize a URL path.
///
/// Percent-escapes are decoded, empty and `.` segments collapse, a trailing
/// slash is dropped except for the root. `..` segments, NUL bytes and
/// backslashes are rejected before anything touches the file system.
pub fn normalize_path(raw: &str) -> Result<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| RouterError::invalid_path(raw, "percent-decoding does not yield UTF-8"))?;

    if decoded.contains('\0') {
        return Err(RouterError::invalid_path(raw, "NUL byte in path"));
    }
    if decoded.contains('\\') {
        return Err(RouterError::invalid_path(raw, "backslash in path"));
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(RouterError::invalid_path(raw, "parent directory segment")),
            other => segments.push(other),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Locates executables and their visible shared directories
#[derive(Debug, Clone)]
pub struct RouteResolver {
    site_root: PathBuf,
}

impl RouteResolver {
    /// Create a resolver for a site root, which must be an existing directory
    pub fn new(site_root: impl AsRef<Path>) -> Result<Self> {
        let site_root = site_root.as_ref();
        let canonical = site_root.canonicalize().map_err(|e| {
            RouterError::config_field_error(
                "routes.site_root",
                format!("Site root {:?} is not accessible: {}", site_root, e),
                Some("Point routes.site_root at the directory containing your route executables".to_string()),
            )
        })?;

        if !canonical.is_dir() {
            return Err(RouterError::config_field_error(
                "routes.site_root",
                format!("Site root {:?} is not a directory", canonical),
                None,
            ));
        }

        Ok(Self { site_root: canonical })
    }

    /// Canonical site root
    pub fn site_root(&self) -> &Path {
        &self.site_root
    }

    /// Normalize and resolve a raw path
    pub fn resolve(&self, path: &str) -> Result<RouteEntry> {
        let normalized = normalize_path(path)?;
        self.resolve_normalized(&normalized)
    }

    /// Resolve a path already produced by [`normalize_path`]
    pub fn resolve_normalized(&self, route_path: &str) -> Result<RouteEntry> {
        let segments: Vec<&str> = route_path.split('/').filter(|s| !s.is_empty()).collect();

        for segment in &segments {
            if *segment == SHARED_DIR || segment.starts_with('.') {
                return Err(RouterError::route_not_found(route_path));
            }
        }

        let (executable, exe_dir) = match segments.split_last() {
            None => (self.site_root.join(INDEX_NAME), self.site_root.clone()),
            Some((last, parents)) => {
                let mut dir = self.site_root.clone();
                for parent in parents {
                    dir.push(parent);
                    if !dir.is_dir() {
                        return Err(RouterError::route_not_found(route_path));
                    }
                }

                let candidate = dir.join(last);
                if candidate.is_dir() {
                    (candidate.join(INDEX_NAME), candidate)
                } else {
                    (candidate, dir)
                }
            }
        };

        if !executable.is_file() {
            debug!(
                target: "exec_router::routing",
                route = %route_path,
                "No executable at resolved location"
            );
            return Err(RouterError::route_not_found(route_path));
        }

        self.ensure_contained(&executable)?;

        Ok(RouteEntry {
            route_path: route_path.to_string(),
            resource_paths: self.shared_dirs_for(&exe_dir),
            executable,
        })
    }

    /// Shared directories visible from `dir`, from `dir` itself up to the site root
    pub fn shared_dirs_for(&self, dir: &Path) -> Vec<PathBuf> {
        let Ok(relative) = dir.strip_prefix(&self.site_root) else {
            return Vec::new();
        };

        let mut levels = vec![self.site_root.clone()];
        let mut current = self.site_root.clone();
        for component in relative.components() {
            if let Component::Normal(name) = component {
                current.push(name);
                levels.push(current.clone());
            }
        }

        levels
            .into_iter()
            .rev()
            .map(|level| level.join(SHARED_DIR))
            .filter(|shared| shared.is_dir())
            .collect()
    }

    fn ensure_contained(&self, executable: &Path) -> Result<()> {
        let canonical = executable.canonicalize()?;
        if canonical.starts_with(&self.site_root) {
            Ok(())
        } else {
            crate::utils::logging::log_security_event(
                "executable_escape",
                &format!("{:?} resolves outside the site root", executable),
            );
            Err(RouterError::ResourceAccessDenied {
                path: canonical,
                root: self.site_root.clone(),
            })
        }
    }
}

/// Resolver with an optional cache and file-system watcher in front of it
pub struct RouteLookup {
    resolver: RouteResolver,
    cache: Option<Arc<RouteCache>>,
    _watcher: Option<RouteWatcher>,
}

impl RouteLookup {
    /// Lookup without caching
    pub fn uncached(resolver: RouteResolver) -> Self {
        Self {
            resolver,
            cache: None,
            _watcher: None,
        }
    }

    /// Lookup backed by a cache, optionally invalidated by a tree watcher
    pub fn cached(resolver: RouteResolver, cache: Arc<RouteCache>, watch: bool) -> Result<Self> {
        let watcher = if watch {
            Some(RouteWatcher::spawn(resolver.site_root(), Arc::clone(&cache))?)
        } else {
            None
        };

        Ok(Self {
            resolver,
            cache: Some(cache),
            _watcher: watcher,
        })
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    pub fn cache(&self) -> Option<&RouteCache> {
        self.cache.as_deref()
    }

    /// Resolve a normalized path, consulting the cache first
    pub fn lookup(&self, route_path: &str) -> Result<Arc<RouteEntry>> {
        let Some(cache) = &self.cache else {
            return self.resolver.resolve_normalized(route_path).map(Arc::new);
        };

        if let Some(entry) = cache.get(route_path) {
            return Ok(entry);
        }

        let entry = self.resolver.resolve_normalized(route_path)?;
        Ok(cache.insert(entry))
    }
}

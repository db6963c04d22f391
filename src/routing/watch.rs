//! Directory-tree watcher that invalidates the route cache

use std::path::Path;
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{Result, RouterError};
use crate::routing::RouteCache;

/// Keeps a recursive watch on the site root alive.
///
/// Any create, modify or remove event clears the whole cache.
pub struct RouteWatcher {
    _watcher: RecommendedWatcher,
}

impl RouteWatcher {
    /// Start watching `root`
    pub fn spawn(root: &Path, cache: Arc<RouteCache>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                debug!(
                    target: "exec_router::routing",
                    kind = ?event.kind,
                    paths = ?event.paths,
                    "Route tree changed; clearing route cache"
                );
                cache.invalidate_all();
            }
            Err(e) => warn!(target: "exec_router::routing", "Route watcher error: {}", e),
        })
        .map_err(|e| watch_error(root, e))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| watch_error(root, e))?;

        Ok(Self { _watcher: watcher })
    }
}

fn watch_error(root: &Path, e: notify::Error) -> RouterError {
    RouterError::config_field_error(
        "routes.watch_routes",
        format!("Cannot watch {:?}: {}", root, e),
        Some("Disable routes.watch_routes to rely on per-file fingerprints and the cache TTL".to_string()),
    )
}

impl std::fmt::Debug for RouteWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteWatcher").finish_non_exhaustive()
    }
}

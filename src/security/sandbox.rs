//! Per-invocation resource and storage descriptor

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, RouterError};
use crate::message::Context;
use crate::utils::{ensure_private_dir, logging};

/// Hex characters of the route digest used as the storage directory name
const STORAGE_NAME_LEN: usize = 32;

/// Builds the [`Context`] handed to each route process.
///
/// Resource directories are read-only by contract; the per-route storage
/// directory is the only writable location offered.
#[derive(Debug, Clone)]
pub struct SandboxContext {
    site_root: PathBuf,
    storage_root: PathBuf,
}

impl SandboxContext {
    /// Create a sandbox for a site root; the storage root is created if missing
    pub fn new(site_root: impl AsRef<Path>, storage_root: impl AsRef<Path>) -> Result<Self> {
        let site_root = site_root.as_ref().canonicalize().map_err(|e| {
            RouterError::config_field_error(
                "routes.site_root",
                format!("Site root {:?} is not accessible: {}", site_root.as_ref(), e),
                None,
            )
        })?;

        let storage_root = storage_root.as_ref();
        ensure_private_dir(storage_root)?;
        let storage_root = storage_root.canonicalize()?;

        Ok(Self {
            site_root,
            storage_root,
        })
    }

    pub fn site_root(&self) -> &Path {
        &self.site_root
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Deterministic storage directory for a route; not created
    pub fn storage_path_for(&self, route_path: &str) -> PathBuf {
        let digest = Sha256::digest(route_path.as_bytes());
        let name = hex::encode(digest);
        self.storage_root.join(&name[..STORAGE_NAME_LEN])
    }

    /// Build the context for one invocation.
    ///
    /// Every resource directory must canonicalize to a location inside the
    /// site root; shared directories that vanished since resolution are
    /// skipped. The storage directory is created on demand with owner-only
    /// permissions.
    pub fn build(&self, route_path: &str, resource_paths: &[PathBuf]) -> Result<Context> {
        let mut allowed = Vec::with_capacity(resource_paths.len());

        for path in resource_paths {
            let canonical = match path.canonicalize() {
                Ok(canonical) => canonical,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(
                        target: "exec_router::security",
                        route = %route_path,
                        path = ?path,
                        "Shared directory disappeared; skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !canonical.starts_with(&self.site_root) {
                logging::log_security_event(
                    "resource_escape",
                    &format!("route {} shared directory {:?} resolves outside the site root", route_path, path),
                );
                return Err(RouterError::ResourceAccessDenied {
                    path: canonical,
                    root: self.site_root.clone(),
                });
            }

            allowed.push(canonical);
        }

        let storage_path = self.storage_path_for(route_path);
        ensure_private_dir(&storage_path)?;

        Ok(Context::new(route_path.to_string(), allowed, storage_path))
    }
}

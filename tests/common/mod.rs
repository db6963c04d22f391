//! Shared fixtures: a temporary site tree with shell-script routes

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use exec_router::config::RouterConfig;
use exec_router::{ExecRouter, HttpMethod, Request};
use tempfile::TempDir;

/// Route that returns a fixed HTML page
pub const HELLO_SCRIPT: &str = r#"cat > /dev/null
printf '{"status":200,"body":"<html><body>Hello</body></html>"}'"#;

/// Temporary site root and storage root
pub struct SiteFixture {
    pub site: TempDir,
    pub storage: TempDir,
}

impl SiteFixture {
    /// Create an empty site with a global shared directory
    pub fn new() -> Self {
        let site = tempfile::tempdir().expect("Failed to create site dir");
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        fs::create_dir(site.path().join("shared")).expect("Failed to create shared dir");
        Self { site, storage }
    }

    pub fn root(&self) -> &Path {
        self.site.path()
    }

    /// Create a directory relative to the site root
    pub fn add_dir(&self, rel: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(&path).expect("Failed to create directory");
        path
    }

    /// Write an executable `/bin/sh` script at `rel`
    pub fn add_route(&self, rel: &str, script: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create route directory");
        }
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).expect("Failed to write route");
        set_mode(&path, 0o755);
        path
    }

    /// Write a plain file that is not executable
    pub fn add_file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create directory");
        }
        fs::write(&path, contents).expect("Failed to write file");
        set_mode(&path, 0o644);
        path
    }

    /// Configuration pointing at this fixture
    pub fn config(&self) -> RouterConfig {
        RouterConfig::builder()
            .site_root(self.root())
            .storage_root(self.storage.path().join("data"))
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build config")
    }

    pub fn router(&self) -> ExecRouter {
        ExecRouter::new(self.config()).expect("Failed to create router")
    }

    pub fn router_with(&self, config: RouterConfig) -> ExecRouter {
        ExecRouter::new(config).expect("Failed to create router")
    }
}

fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("Failed to set permissions");
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
}

/// Build a GET request
pub fn get(path: &str) -> Request {
    Request::builder(HttpMethod::GET, path)
        .build()
        .expect("Failed to build request")
}

/// Whether `pid` names a live process; zombies count as gone
#[cfg(target_os = "linux")]
pub fn process_running(pid: &str) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid.trim())) else {
        return false;
    };
    let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
    !matches!(state, Some("Z") | Some("X") | None)
}

/// Poll until `check` holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Contents of `name` in the first route storage directory, once written
pub fn read_storage_file(fixture: &SiteFixture, name: &str) -> Option<String> {
    fs::read_dir(fixture.storage.path().join("data"))
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(name))
        .find_map(|path| fs::read_to_string(path).ok())
        .filter(|contents| contents.ends_with('\n'))
}

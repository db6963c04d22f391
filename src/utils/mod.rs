//! Utility functions and helpers

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Result, RouterError};

/// Create a directory (and parents) readable and writable by the owner only
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|e| {
        RouterError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create directory {:?}: {}", path, e),
        ))
    })
}

/// Join directories into a platform path list (`:`-separated on Unix)
pub fn join_path_list(paths: &[PathBuf]) -> OsString {
    // Paths containing the separator cannot be represented; fall back to the first entry
    std::env::join_paths(paths).unwrap_or_else(|_| {
        paths.first().map(|p| p.as_os_str().to_owned()).unwrap_or_default()
    })
}

/// Shorten diagnostic text to at most `max` characters
pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut shortened: String = text.chars().take(max).collect();
    shortened.push_str("...");
    shortened
}

pub mod logging;

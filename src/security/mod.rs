//! Capabilities and resource limits applied to route processes

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

pub mod sandbox;

pub use sandbox::SandboxContext;

/// Variables passed through by default
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "LANG", "HOME", "TZ"];

/// Host environment variables visible to a route process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "vars", rename_all = "lowercase")]
pub enum EnvironmentCapability {
    /// No host variables at all
    None,

    /// Allow only specific variables
    Allowlist(Vec<String>),

    /// Inherit the full host environment
    Full,
}

impl Default for EnvironmentCapability {
    fn default() -> Self {
        Self::Allowlist(DEFAULT_ENV_ALLOWLIST.iter().map(|v| v.to_string()).collect())
    }
}

impl EnvironmentCapability {
    /// Apply the capability to a command before it is spawned
    pub fn apply(&self, command: &mut Command) {
        match self {
            Self::Full => {}
            Self::None => {
                command.env_clear();
            }
            Self::Allowlist(vars) => {
                command.env_clear();
                for var in vars {
                    if let Some(value) = std::env::var_os(var) {
                        command.env(var, value);
                    }
                }
            }
        }
    }
}

/// Per-invocation resource limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock limit for one invocation
    pub timeout: Duration,

    /// Maximum bytes accepted on the process's standard output
    pub max_output_bytes: usize,

    /// Maximum bytes of standard error kept for diagnostics
    pub max_stderr_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_output_bytes: 8 * 1024 * 1024, // 8MB
            max_stderr_bytes: 64 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Default limits with a different time limit
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allowlist() {
        match EnvironmentCapability::default() {
            EnvironmentCapability::Allowlist(vars) => {
                assert!(vars.iter().any(|v| v == "PATH"));
                assert_eq!(vars.len(), DEFAULT_ENV_ALLOWLIST.len());
            }
            other => panic!("unexpected default: {other:?}"),
        }
    }

    #[test]
    fn test_capability_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            env: EnvironmentCapability,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [env]
            mode = "allowlist"
            vars = ["PATH", "DATABASE_URL"]
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.env,
            EnvironmentCapability::Allowlist(vec!["PATH".into(), "DATABASE_URL".into()])
        );

        let full: Wrapper = toml::from_str("[env]\nmode = \"full\"\n").unwrap();
        assert_eq!(full.env, EnvironmentCapability::Full);
    }
}

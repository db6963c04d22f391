use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invocation identifier for correlating logs across one request
pub type InvocationId = uuid::Uuid;

/// Failure taxonomy shared by every stage of the request pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The URL path is malformed or attempts traversal
    InvalidPath,

    /// No executable occupies the resolved tree position
    RouteNotFound,

    /// A resolved path escapes the site root
    ResourceAccessDenied,

    /// The executable could not be started
    ProcessSpawnFailure,

    /// The process did not exit within the configured limit
    ProcessTimeout,

    /// The process exited with a non-zero status
    NonZeroExit,

    /// The process output is not a recognized response encoding
    MalformedOutput,

    /// Bytes could not be decoded into a response
    DecodeError,

    /// Invalid configuration
    Configuration,

    /// Anything else (I/O on the host side, serialization of the request)
    Internal,
}

impl ErrorKind {
    /// HTTP status code this kind maps to
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidPath => 400,
            Self::ResourceAccessDenied => 403,
            Self::RouteNotFound => 404,
            Self::ProcessSpawnFailure | Self::NonZeroExit => 500,
            Self::MalformedOutput | Self::DecodeError => 502,
            Self::ProcessTimeout => 504,
            Self::Configuration | Self::Internal => 500,
        }
    }

    /// Stable tag used in logs and statistics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::RouteNotFound => "route_not_found",
            Self::ResourceAccessDenied => "resource_access_denied",
            Self::ProcessSpawnFailure => "process_spawn_failure",
            Self::ProcessTimeout => "process_timeout",
            Self::NonZeroExit => "non_zero_exit",
            Self::MalformedOutput => "malformed_output",
            Self::DecodeError => "decode_error",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Whether this kind is detected before any process is spawned
    pub fn is_pre_execution(self) -> bool {
        matches!(
            self,
            Self::InvalidPath | Self::RouteNotFound | Self::ResourceAccessDenied
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the exec-router crate with detailed context.
///
/// The context fields are for operators only. Client-visible bodies are
/// built from [`RouterError::public_message`], which never includes them.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Malformed or traversing URL path
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// No executable at the resolved location
    #[error("Route not found: {path}")]
    RouteNotFound { path: String },

    /// A path escaped the configured site root
    #[error("Resource access denied: {path:?} is outside {root:?}")]
    ResourceAccessDenied { path: PathBuf, root: PathBuf },

    /// The child could not be started
    #[error("Failed to spawn {executable:?}: {reason}")]
    ProcessSpawnFailure {
        executable: PathBuf,
        reason: String,
        invocation_id: Option<InvocationId>,
    },

    /// The child exceeded its time limit and was terminated
    #[error("Process {executable:?} timed out after {duration:?}")]
    ProcessTimeout {
        executable: PathBuf,
        duration: Duration,
        invocation_id: Option<InvocationId>,
    },

    /// The child exited unsuccessfully
    #[error("Process {executable:?} exited with status {code:?}")]
    NonZeroExit {
        executable: PathBuf,
        code: Option<i32>,
        stderr: String,
        invocation_id: Option<InvocationId>,
    },

    /// The child exited cleanly but its output is unusable
    #[error("Malformed output from {executable:?}: {reason}")]
    MalformedOutput {
        executable: PathBuf,
        reason: String,
        invocation_id: Option<InvocationId>,
    },

    /// No decoder in the chain accepted the bytes
    #[error("Decode error: {reason}")]
    DecodeError { reason: String, attempts: Vec<String> },

    /// Configuration error with helpful suggestions
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
        field: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RouterError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a route not found error
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create a configuration error with suggestion
    pub fn config_error(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion,
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_field_error(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion,
            field: Some(field.into()),
        }
    }

    /// Taxonomy tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::RouteNotFound { .. } => ErrorKind::RouteNotFound,
            Self::ResourceAccessDenied { .. } => ErrorKind::ResourceAccessDenied,
            Self::ProcessSpawnFailure { .. } => ErrorKind::ProcessSpawnFailure,
            Self::ProcessTimeout { .. } => ErrorKind::ProcessTimeout,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::DecodeError { .. } => ErrorKind::DecodeError,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code for the synthesized error response
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Generic, client-safe description of the failure
    pub fn public_message(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            502 => "Bad Gateway",
            504 => "Gateway Timeout",
            _ => "Internal Server Error",
        }
    }

    /// Invocation this error belongs to, when it happened during execution
    pub fn invocation_id(&self) -> Option<InvocationId> {
        match self {
            Self::ProcessSpawnFailure { invocation_id, .. }
            | Self::ProcessTimeout { invocation_id, .. }
            | Self::NonZeroExit { invocation_id, .. }
            | Self::MalformedOutput { invocation_id, .. } => *invocation_id,
            _ => None,
        }
    }
}

/// Result type for the exec-router crate
pub type Result<T> = std::result::Result<T, RouterError>;

/// Short alias used throughout the crate
pub type Error = RouterError;

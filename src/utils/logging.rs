//! Structured logging

use std::sync::Once;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::{ErrorKind, InvocationId, RouterError};

static INIT: Once = Once::new();

/// Initialize logging with a default filter; `RUST_LOG` takes precedence
pub fn init_with_filter(filter: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init();
    });
}

/// Log a security event
pub fn log_security_event(event_type: &str, message: &str) {
    warn!(
        target: "exec_router::security",
        event_type = %event_type,
        "Security event: {}",
        message
    );
}

/// Log a state transition of one invocation
pub fn log_invocation_state(invocation_id: InvocationId, route: &str, state: &str) {
    tracing::trace!(
        target: "exec_router::executor",
        invocation_id = %invocation_id,
        route = %route,
        state = %state,
        "Invocation state: {}",
        state
    );
}

/// Log the outcome of a finished request
pub fn log_request_outcome(
    method: &str,
    route: &str,
    status: u16,
    outcome: &str,
    duration: Duration,
    invocation_id: InvocationId,
) {
    info!(
        target: "exec_router::server",
        method = %method,
        route = %route,
        status = status,
        outcome = %outcome,
        duration_ms = duration.as_millis() as u64,
        invocation_id = %invocation_id,
        "{} {} -> {}",
        method,
        route,
        status
    );
}

/// Log a failed request with full diagnostics.
///
/// Pre-execution failures are routine and logged quietly; execution failures
/// carry the operator-only details that never reach the client.
pub fn log_error(component: &str, err: &RouterError) {
    match err.kind() {
        ErrorKind::RouteNotFound | ErrorKind::InvalidPath => debug!(
            target: "exec_router::error",
            component = %component,
            kind = %err.kind(),
            "Rejected request in {}: {}",
            component,
            err
        ),
        ErrorKind::ResourceAccessDenied => warn!(
            target: "exec_router::error",
            component = %component,
            kind = %err.kind(),
            "Denied request in {}: {}",
            component,
            err
        ),
        kind => error!(
            target: "exec_router::error",
            component = %component,
            kind = %kind,
            invocation_id = ?err.invocation_id(),
            "Error in {}: {}",
            component,
            err
        ),
    }
}

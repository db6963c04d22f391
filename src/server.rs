//! HTTP front end
//!
//! Every path is served by a single fallback handler that converts the HTTP
//! request into a [`Request`], hands it to a [`RouteInvoker`] and converts the
//! resulting [`Response`] back.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::{HttpMethod, QueryParams, Request, Response};
use crate::runtime::RouteInvoker;
use crate::utils::logging;

/// Headers owned by the connection, never copied from a route response
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
struct AppState {
    invoker: Arc<dyn RouteInvoker>,
    max_body_bytes: usize,
}

/// Build the application router
pub fn router(invoker: Arc<dyn RouteInvoker>, max_body_bytes: usize) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(AppState {
            invoker,
            max_body_bytes,
        })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
}

/// Serve until Ctrl+C or SIGTERM
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    serve_with_shutdown(listener, app, shutdown_signal()).await
}

/// Serve until `signal` resolves, then drain in-flight requests
pub async fn serve_with_shutdown<F>(listener: TcpListener, app: Router, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(target: "exec_router::server", "Listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(signal)
        .await?;

    info!(target: "exec_router::server", "Server stopped");
    Ok(())
}

async fn handle(State(state): State<AppState>, request: axum::extract::Request) -> axum::response::Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(target: "exec_router::server", path = %parts.uri.path(), "Rejected request body: {}", e);
            return to_http(Response::error_page(413, "Payload Too Large"));
        }
    };

    let mut builder = Request::builder(HttpMethod::parse(parts.method.as_str()), parts.uri.path());
    for (name, value) in &parts.headers {
        // obs-text bytes survive as replacement characters
        builder = builder.header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }
    for (key, value) in parse_query(parts.uri.query()) {
        builder = builder.query_param(key, value);
    }
    if !body.is_empty() {
        builder = builder.body(body.to_vec());
    }
    if let Some(addr) = remote {
        builder = builder.remote_addr(addr.to_string());
    }

    let response = match builder.build() {
        Ok(request) => state.invoker.invoke(request).await,
        Err(e) => {
            logging::log_error("server", &e);
            Response::error_page(e.status_code(), e.public_message())
        }
    };

    to_http(response)
}

/// Decode a query string; malformed strings yield no parameters
fn parse_query(query: Option<&str>) -> QueryParams {
    let Some(query) = query else {
        return QueryParams::new();
    };

    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => pairs.into_iter().collect(),
        Err(e) => {
            debug!(target: "exec_router::server", "Ignoring malformed query string: {}", e);
            QueryParams::new()
        }
    }
}

fn to_http(response: Response) -> axum::response::Response {
    let (status, headers, body) = response.into_parts();

    let mut out = axum::response::Response::new(Body::from(body));
    *out.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => debug!(target: "exec_router::server", header = %name, "Dropping invalid response header"),
        }
    }

    out
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "exec_router::server", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(target: "exec_router::server", "Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target: "exec_router::server", "Shutdown signal received, draining requests...");
}

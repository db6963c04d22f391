//! Request, response and context types exchanged with route processes

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{InvocationId, Result};
use crate::routing::normalize_path;

/// Content type injected into every response that does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Header map with lower-cased, unique names
pub type Headers = BTreeMap<String, String>;

/// Query parameter map; repeated keys keep the last value
pub type QueryParams = BTreeMap<String, String>;

/// HTTP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,

    /// Any other extension method token
    Other(String),
}

impl HttpMethod {
    /// Parse a method token. Methods are case-sensitive.
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::GET,
            "HEAD" => Self::HEAD,
            "POST" => Self::POST,
            "PUT" => Self::PUT,
            "DELETE" => Self::DELETE,
            "PATCH" => Self::PATCH,
            "OPTIONS" => Self::OPTIONS,
            other => Self::Other(other.to_string()),
        }
    }

    /// The method token as sent on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::GET => "GET",
            Self::HEAD => "HEAD",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::DELETE => "DELETE",
            Self::PATCH => "PATCH",
            Self::OPTIONS => "OPTIONS",
            Self::Other(token) => token,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource and storage access rights handed to one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Resolved logical route, e.g. `/products/electronics/widget`
    route_path: String,

    /// Readable shared directories, most specific first
    resource_paths: Vec<PathBuf>,

    /// The single writable directory for this route
    storage_path: PathBuf,
}

impl Context {
    pub(crate) fn new(route_path: String, resource_paths: Vec<PathBuf>, storage_path: PathBuf) -> Self {
        Self {
            route_path,
            resource_paths,
            storage_path,
        }
    }

    pub fn route_path(&self) -> &str {
        &self.route_path
    }

    pub fn resource_paths(&self) -> &[PathBuf] {
        &self.resource_paths
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Locate a named resource, first match wins in specificity order
    pub fn find_resource(&self, name: &str) -> Option<PathBuf> {
        self.resource_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// An inbound request, immutable once built
#[derive(Debug, Clone)]
pub struct Request {
    invocation_id: InvocationId,
    method: HttpMethod,
    path: String,
    headers: Headers,
    query: QueryParams,
    body: Option<Vec<u8>>,
    remote_addr: Option<String>,
    context: Option<Context>,
}

impl Request {
    /// Start building a request for a raw (not yet normalized) path
    pub fn builder(method: HttpMethod, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            path: path.into(),
            headers: Headers::new(),
            query: QueryParams::new(),
            body: None,
            remote_addr: None,
        }
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    pub fn method(&self) -> &HttpMethod {
        &self.method
    }

    /// Normalized path, always with a leading `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Return a copy of this request carrying the given context
    pub fn with_context(self, context: Context) -> Self {
        Self {
            context: Some(context),
            ..self
        }
    }
}

/// Builder for [`Request`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    path: String,
    headers: Headers,
    query: QueryParams,
    body: Option<Vec<u8>>,
    remote_addr: Option<String>,
}

impl RequestBuilder {
    /// Add a header; a repeated name is joined as a list
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
        self
    }

    /// Add a query parameter; a repeated key replaces the previous value
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Normalize the path and build the request.
    ///
    /// Fails with `InvalidPath` for traversal attempts and malformed paths.
    pub fn build(self) -> Result<Request> {
        let path = normalize_path(&self.path)?;

        Ok(Request {
            invocation_id: InvocationId::new_v4(),
            method: self.method,
            path,
            headers: self.headers,
            query: self.query,
            body: self.body,
            remote_addr: self.remote_addr,
            context: None,
        })
    }
}

/// An HTTP response produced by a route process or synthesized on failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Create a response with no explicit headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::with_headers(status, Headers::new(), body)
    }

    /// Create a response; header names are lower-cased and the default
    /// content type is injected when absent
    pub fn with_headers(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        let mut normalized: Headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        normalized
            .entry("content-type".to_string())
            .or_insert_with(|| DEFAULT_CONTENT_TYPE.to_string());

        Self {
            status,
            headers: normalized,
            body: body.into(),
        }
    }

    /// Create an OK response with HTML
    pub fn html(body: &str) -> Self {
        Self::new(200, body.as_bytes().to_vec())
    }

    /// Create an OK response with plain text
    pub fn text(body: &str) -> Self {
        Self::new(200, body.as_bytes().to_vec())
            .with_header("Content-Type", "text/plain; charset=utf-8")
    }

    /// Synthesize a generic error page for a status code
    pub fn error_page(status: u16, message: &str) -> Self {
        let body = format!(
            "<!DOCTYPE html><html><head><title>{status} {message}</title></head>\
             <body><h1>{status} {message}</h1></body></html>"
        );
        Self::html(&body).with_status(status)
    }

    /// Set the status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header, replacing any previous value
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (u16, Headers, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}

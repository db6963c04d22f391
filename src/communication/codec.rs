//! Wire format for requests written to a route process and responses read back

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use serde::{Deserialize, Serialize};

use crate::communication::ResponseDecoder;
use crate::error::{InvocationId, Result};
use crate::message::{Context, Headers, QueryParams, Request, Response};

const PADDING_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PADDING_INDIFFERENT);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PADDING_INDIFFERENT);

/// How a body string is encoded on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Base64,
}

impl BodyEncoding {
    fn encode(body: &[u8]) -> (Cow<'_, str>, Self) {
        match std::str::from_utf8(body) {
            Ok(text) => (Cow::Borrowed(text), Self::Utf8),
            Err(_) => (Cow::Owned(STANDARD_LENIENT.encode(body)), Self::Base64),
        }
    }

    fn decode(self, body: String) -> std::result::Result<Vec<u8>, String> {
        match self {
            Self::Utf8 => Ok(body.into_bytes()),
            Self::Base64 => STANDARD_LENIENT
                .decode(body.as_bytes())
                .map_err(|e| format!("invalid base64 body: {}", e)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    invocation_id: InvocationId,
    method: &'a str,
    path: &'a str,
    headers: &'a Headers,
    query: &'a QueryParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_encoding: Option<BodyEncoding>,
    remote_addr: Option<&'a str>,
    context: Option<&'a Context>,
}

/// Structured response as written by a route process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WireResponse {
    pub status: u16,

    #[serde(default)]
    pub headers: Headers,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub body_encoding: BodyEncoding,
}

impl WireResponse {
    /// Validate and convert into a [`Response`]
    pub fn into_response(self) -> std::result::Result<Response, String> {
        // Informational statuses cannot be a final response
        if !(200..=599).contains(&self.status) {
            return Err(format!("status {} is not a valid final HTTP status", self.status));
        }

        let body = self.body_encoding.decode(self.body)?;
        Ok(Response::with_headers(self.status, self.headers, body))
    }
}

/// Serialize a request for a process's standard input.
///
/// The payload is a single JSON document terminated by a newline.
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let (body, body_encoding) = match request.body() {
        Some(bytes) => {
            let (body, encoding) = BodyEncoding::encode(bytes);
            (Some(body), Some(encoding))
        }
        None => (None, None),
    };

    let wire = WireRequest {
        invocation_id: request.invocation_id(),
        method: request.method().as_str(),
        path: request.path(),
        headers: request.headers(),
        query: request.query(),
        body,
        body_encoding,
        remote_addr: request.remote_addr(),
        context: request.context(),
    };

    let mut payload = serde_json::to_vec(&wire)?;
    payload.push(b'\n');
    Ok(payload)
}

/// Direct JSON encoding
pub struct JsonDecoder;

impl ResponseDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Response, String> {
        let wire: WireResponse = serde_json::from_slice(bytes.trim_ascii()).map_err(|e| e.to_string())?;
        wire.into_response()
    }
}

/// Base64 text wrapping of the JSON encoding, for text-only transports
pub struct Base64JsonDecoder;

impl ResponseDecoder for Base64JsonDecoder {
    fn name(&self) -> &'static str {
        "base64-json"
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Response, String> {
        let compact: Vec<u8> = bytes.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();

        let decoded = STANDARD_LENIENT
            .decode(&compact)
            .or_else(|_| URL_SAFE_LENIENT.decode(&compact))
            .map_err(|e| e.to_string())?;

        JsonDecoder.decode(&decoded)
    }
}

/// MessagePack encoding of the same structure
pub struct MessagePackDecoder;

impl ResponseDecoder for MessagePackDecoder {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Response, String> {
        let wire: WireResponse = rmp_serde::from_slice(bytes).map_err(|e| e.to_string())?;
        wire.into_response()
    }
}

//! Host-process communication: request encoding and response decoding

use once_cell::sync::Lazy;

use crate::error::{Result, RouterError};
use crate::message::Response;

pub mod codec;
pub mod io;

pub use codec::{encode_request, Base64JsonDecoder, BodyEncoding, JsonDecoder, MessagePackDecoder, WireResponse};

/// One independent, side-effect-free attempt at decoding process output
pub trait ResponseDecoder: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Decode the bytes or explain why this format does not apply
    fn decode(&self, bytes: &[u8]) -> std::result::Result<Response, String>;
}

/// Ordered list of decode attempts; the first success wins
pub struct DecodeChain {
    decoders: Vec<Box<dyn ResponseDecoder>>,
}

impl DecodeChain {
    /// Direct JSON, then base64-wrapped JSON, then MessagePack
    pub fn standard() -> Self {
        Self::with_decoders(vec![
            Box::new(JsonDecoder),
            Box::new(Base64JsonDecoder),
            Box::new(MessagePackDecoder),
        ])
    }

    /// Create a chain from custom decoders
    pub fn with_decoders(decoders: Vec<Box<dyn ResponseDecoder>>) -> Self {
        Self { decoders }
    }

    /// Names of the decoders in attempt order
    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Run the attempts in order
    pub fn decode(&self, bytes: &[u8]) -> Result<Response> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(RouterError::DecodeError {
                reason: "output is empty".to_string(),
                attempts: Vec::new(),
            });
        }

        let mut attempts = Vec::with_capacity(self.decoders.len());
        for decoder in &self.decoders {
            match decoder.decode(bytes) {
                Ok(response) => {
                    tracing::trace!(
                        target: "exec_router::codec",
                        decoder = decoder.name(),
                        "Decoded response"
                    );
                    return Ok(response);
                }
                Err(reason) => attempts.push(format!("{}: {}", decoder.name(), reason)),
            }
        }

        Err(RouterError::DecodeError {
            reason: "output matches no known response encoding".to_string(),
            attempts,
        })
    }
}

impl Default for DecodeChain {
    fn default() -> Self {
        Self::standard()
    }
}

static STANDARD_CHAIN: Lazy<DecodeChain> = Lazy::new(DecodeChain::standard);

/// Decode process output with the standard chain
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    STANDARD_CHAIN.decode(bytes)
}

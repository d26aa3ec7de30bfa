//! Binary transport codec.
//!
//! The host and the sandbox exchange text, so payloads cross the boundary as
//! standard padded base64. This is the same alphabet the in-sandbox
//! `transport.encode`/`transport.decode` helpers use.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::MalformedTransportError;

/// Encode raw bytes into transport text. Total over all inputs.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text back into bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, MalformedTransportError> {
    STANDARD
        .decode(text)
        .map_err(|source| MalformedTransportError {
            encoded_len: text.len(),
            source,
        })
}

//! Request envelopes and correlation keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::command::CommandDescriptor;
use crate::validate::{SizeCeiling, ValidatedRequest};

/// Deterministic identifier for a request, derived from its contents.
///
/// Identical payload, command and filename always map to the same key, so a
/// surrounding layer can recognise a repeated request. The bridge itself
/// never caches on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn derive(
        prefix: &str,
        payload: &[u8],
        command: &CommandDescriptor,
        filename: Option<&str>,
    ) -> Self {
        let payload_digest = Sha256::digest(payload);

        // Length prefixes keep ["ab", "c"] and ["a", "bc"] apart.
        let mut hasher = Sha256::new();
        for token in command.tokens() {
            hasher.update((token.len() as u64).to_le_bytes());
            hasher.update(token.as_bytes());
        }
        if let Some(name) = filename {
            hasher.update(b"\x00filename");
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
        }
        let command_digest = hasher.finalize();

        Self(format!(
            "{}_{}_{}",
            prefix,
            short_hex(&payload_digest),
            short_hex(&command_digest)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short_hex(digest: &[u8]) -> String {
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Everything that crosses into the sandbox for one invocation.
///
/// Serializes to `{"payload", "command", "filename"?, "sizeCeiling"}`; the
/// correlation key stays on the host side of the boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    payload: String,
    command: CommandDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    size_ceiling: SizeCeiling,
    #[serde(skip)]
    key: CorrelationKey,
    #[serde(skip)]
    payload_bytes: usize,
}

impl RequestEnvelope {
    /// Encode `payload` (copying it) and attach the validated request.
    pub fn new(key_prefix: &str, payload: &[u8], request: ValidatedRequest) -> Self {
        let key = CorrelationKey::derive(
            key_prefix,
            payload,
            &request.command,
            request.filename.as_deref(),
        );
        Self {
            payload: codec::encode(payload),
            command: request.command,
            filename: request.filename,
            size_ceiling: request.ceiling,
            key,
            payload_bytes: payload.len(),
        }
    }

    pub fn encoded_payload(&self) -> &str {
        &self.payload
    }

    pub fn command(&self) -> &CommandDescriptor {
        &self.command
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn size_ceiling(&self) -> SizeCeiling {
        self.size_ceiling
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Size of the raw payload before encoding.
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

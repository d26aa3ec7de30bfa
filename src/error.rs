//! Error surface for the bridge.
//!
//! Precondition failures are raised before anything crosses into the
//! sandbox and carry no call context. Everything that happens after the
//! envelope is built carries a [`CallContext`] so the caller can tell which
//! request failed.

use std::fmt;

use thiserror::Error;

use crate::command::CommandDescriptor;
use crate::envelope::CorrelationKey;

/// Transport text that is not valid base64.
#[derive(Debug, Error)]
#[error("malformed transport text ({encoded_len} chars): {source}")]
pub struct MalformedTransportError {
    pub encoded_len: usize,
    #[source]
    pub source: base64::DecodeError,
}

/// What was being attempted when a cross-boundary failure happened.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub operation: &'static str,
    pub payload_bytes: usize,
    pub command: CommandDescriptor,
    pub key: CorrelationKey,
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} bytes with command `{}` [{}]",
            self.operation, self.payload_bytes, self.command, self.key
        )
    }
}

fn megabytes(bytes: &usize) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("input payload cannot be empty")]
    EmptyPayload,

    #[error(
        "payload is too large ({:.1}MB, {size_bytes} bytes); maximum allowed size is {ceiling_mb}MB",
        megabytes(.size_bytes)
    )]
    PayloadTooLarge { size_bytes: usize, ceiling_mb: f64 },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// Failure reported by, or inferred from, the sandboxed engine.
    #[error("engine error: {message} (during {context})")]
    Engine {
        message: String,
        context: Box<CallContext>,
    },

    #[error("malformed transport during {context}")]
    MalformedTransport {
        context: Box<CallContext>,
        #[source]
        source: MalformedTransportError,
    },

    /// Anything else that went wrong while the call was in flight.
    #[error("unexpected bridge failure during {context}: {source}")]
    UnexpectedBridge {
        context: Box<CallContext>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl BridgeError {
    pub(crate) fn engine(message: impl Into<String>, context: &CallContext) -> Self {
        Self::Engine {
            message: message.into(),
            context: Box::new(context.clone()),
        }
    }

    pub(crate) fn malformed(source: MalformedTransportError, context: &CallContext) -> Self {
        Self::MalformedTransport {
            context: Box::new(context.clone()),
            source,
        }
    }

    pub(crate) fn unexpected(source: anyhow::Error, context: &CallContext) -> Self {
        Self::UnexpectedBridge {
            context: Box::new(context.clone()),
            source: source.into(),
        }
    }

    /// True for the failures raised before any cross-boundary call.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::EmptyPayload
                | Self::PayloadTooLarge { .. }
                | Self::InvalidCommand(_)
                | Self::InvalidFilename(_)
        )
    }

    /// The engine's own message, verbatim, for engine errors.
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            Self::Engine { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&CallContext> {
        match self {
            Self::Engine { context, .. }
            | Self::MalformedTransport { context, .. }
            | Self::UnexpectedBridge { context, .. } => Some(&**context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn context() -> CallContext {
        let command = CommandDescriptor::new(["-i", "input.mp4", "output.webm"]).unwrap();
        CallContext {
            operation: "process",
            payload_bytes: 16,
            key: CorrelationKey::derive("bridge", b"dummy video data", &command, None),
            command,
        }
    }

    #[test]
    fn test_too_large_message_has_size_and_ceiling() {
        let err = BridgeError::PayloadTooLarge {
            size_bytes: 2 * 1024 * 1024,
            ceiling_mb: 1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("2.0MB"), "{msg}");
        assert!(msg.contains("2097152 bytes"), "{msg}");
        assert!(msg.contains("maximum allowed size is 1MB"), "{msg}");
        assert!(err.is_precondition());
    }

    #[test]
    fn test_engine_error_keeps_message_and_context() {
        let err = BridgeError::engine("bad flag", &context());
        assert_eq!(err.engine_message(), Some("bad flag"));
        let msg = err.to_string();
        assert!(msg.contains("bad flag"));
        assert!(msg.contains("process of 16 bytes"));
        assert!(msg.contains("-i input.mp4 output.webm"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_unexpected_preserves_cause() {
        let cause = anyhow::anyhow!("isolate crashed");
        let err = BridgeError::unexpected(cause, &context());
        assert_eq!(err.source().unwrap().to_string(), "isolate crashed");
        assert_eq!(err.context().unwrap().payload_bytes, 16);
    }
}

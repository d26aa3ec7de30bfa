//! Turning replies into caller-facing outcomes.
//!
//! | reply                              | outcome                                 |
//! |------------------------------------|-----------------------------------------|
//! | absent / channel abandoned         | `Ok(Outcome::NoResult)`                 |
//! | non-empty `error`                  | `Err(BridgeError::Engine)`              |
//! | `output`, no error                 | `Ok(Outcome::Output(bytes))`            |
//! | neither                            | `Err(Engine("no output produced"))`     |

use crate::channel::Settlement;
use crate::codec;
use crate::error::{BridgeError, CallContext};
use crate::reply::ReplyFields;

pub const NO_OUTPUT_PRODUCED: &str = "no output produced";

/// What the caller gets back when nothing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Output(Vec<u8>),
    /// The sandbox never replied. Not a failure.
    NoResult,
}

impl Outcome {
    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult)
    }

    pub fn into_output(self) -> Option<Vec<u8>> {
        match self {
            Self::Output(bytes) => Some(bytes),
            Self::NoResult => None,
        }
    }
}

/// A reply sorted into exactly one case, before any decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind<'a> {
    NoReply,
    EngineError(&'a str),
    Output(&'a str),
    Missing,
}

pub fn classify(reply: Option<&ReplyFields>) -> ReplyKind<'_> {
    let Some(fields) = reply else {
        return ReplyKind::NoReply;
    };
    if let Some(message) = fields.error.as_deref().filter(|m| !m.is_empty()) {
        return ReplyKind::EngineError(message);
    }
    match fields.output.as_deref() {
        Some(encoded) if !encoded.is_empty() => ReplyKind::Output(encoded),
        _ => ReplyKind::Missing,
    }
}

pub fn interpret(reply: Option<ReplyFields>, context: &CallContext) -> Result<Outcome, BridgeError> {
    match classify(reply.as_ref()) {
        ReplyKind::NoReply => {
            tracing::warn!(
                key = %context.key,
                "sandbox returned no reply; the caller may have navigated away"
            );
            Ok(Outcome::NoResult)
        }
        ReplyKind::EngineError(message) => {
            tracing::error!(key = %context.key, error = message, "engine reported a failure");
            Err(BridgeError::engine(message, context))
        }
        ReplyKind::Missing => {
            tracing::error!(key = %context.key, "engine completed without output");
            Err(BridgeError::engine(NO_OUTPUT_PRODUCED, context))
        }
        ReplyKind::Output(encoded) => {
            let bytes = codec::decode(encoded).map_err(|e| BridgeError::malformed(e, context))?;
            tracing::info!(
                key = %context.key,
                output_bytes = bytes.len(),
                "processing successful. Output size: {:.1}MB",
                bytes.len() as f64 / (1024.0 * 1024.0)
            );
            Ok(Outcome::Output(bytes))
        }
    }
}

/// Interpret a state-channel settlement. Only the completion snapshot counts.
pub fn interpret_settlement(
    settlement: Settlement,
    context: &CallContext,
) -> Result<Outcome, BridgeError> {
    match settlement {
        Settlement::Completed(snapshot) => interpret(Some(snapshot.into()), context),
        Settlement::Abandoned => interpret(None, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSnapshot;
    use crate::command::CommandDescriptor;
    use crate::envelope::CorrelationKey;
    use crate::reply::ReplyMessage;

    fn context() -> CallContext {
        let command = CommandDescriptor::new(["-i", "input.mp4", "output.mp4"]).unwrap();
        CallContext {
            operation: "process",
            payload_bytes: 4,
            key: CorrelationKey::derive("bridge", b"data", &command, None),
            command,
        }
    }

    fn fields(message: ReplyMessage) -> Option<ReplyFields> {
        Some(message.into())
    }

    #[test]
    fn test_output_is_decoded() {
        let outcome = interpret(fields(ReplyMessage::output(codec::encode(b"hi"))), &context()).unwrap();
        assert_eq!(outcome, Outcome::Output(b"hi".to_vec()));
    }

    #[test]
    fn test_engine_error_is_raised() {
        let err = interpret(fields(ReplyMessage::error("bad flag")), &context()).unwrap_err();
        assert!(matches!(err, BridgeError::Engine { .. }));
        assert!(err.to_string().contains("bad flag"));
    }

    #[test]
    fn test_error_wins_over_output() {
        let reply = ReplyMessage {
            output: Some("aGk=".into()),
            error: Some("partial write".into()),
        };
        let err = interpret(fields(reply), &context()).unwrap_err();
        assert_eq!(err.engine_message(), Some("partial write"));
    }

    #[test]
    fn test_absent_reply_is_no_result() {
        let outcome = interpret(None, &context()).unwrap();
        assert!(outcome.is_no_result());
        assert_eq!(outcome.into_output(), None);
    }

    #[test]
    fn test_empty_reply_is_an_anomaly() {
        let err = interpret(fields(ReplyMessage::default()), &context()).unwrap_err();
        assert_eq!(err.engine_message(), Some(NO_OUTPUT_PRODUCED));

        // An empty error string does not count as an error, and an empty
        // output string does not count as output.
        let reply = ReplyMessage {
            output: Some(String::new()),
            error: Some(String::new()),
        };
        let err = interpret(fields(reply), &context()).unwrap_err();
        assert_eq!(err.engine_message(), Some(NO_OUTPUT_PRODUCED));
    }

    #[test]
    fn test_bad_output_encoding() {
        let err = interpret(fields(ReplyMessage::output("%%%")), &context()).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedTransport { .. }));
        assert_eq!(err.context().unwrap().operation, "process");
    }

    #[test]
    fn test_completed_channel_without_fields() {
        let settlement = Settlement::Completed(ChannelSnapshot::default());
        let err = interpret_settlement(settlement, &context()).unwrap_err();
        assert_eq!(err.engine_message(), Some(NO_OUTPUT_PRODUCED));
    }

    #[test]
    fn test_abandoned_channel() {
        let outcome = interpret_settlement(Settlement::Abandoned, &context()).unwrap();
        assert_eq!(outcome, Outcome::NoResult);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(None), ReplyKind::NoReply);
        let reply = ReplyFields {
            output: Some("aGk=".into()),
            error: None,
        };
        assert_eq!(classify(Some(&reply)), ReplyKind::Output("aGk="));
    }
}

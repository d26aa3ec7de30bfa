//! Reply shapes coming back across the boundary.

use serde::{Deserialize, Serialize};

/// Call/reply variant wire shape: `{"output"?: text, "error"?: text}`.
///
/// Unknown keys are ignored; `null` and a missing key mean the same thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReplyMessage {
    pub fn output(encoded: impl Into<String>) -> Self {
        Self {
            output: Some(encoded.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// The two fields the interpreter looks at, whichever variant produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyFields {
    pub output: Option<String>,
    pub error: Option<String>,
}

impl From<ReplyMessage> for ReplyFields {
    fn from(message: ReplyMessage) -> Self {
        Self {
            output: message.output,
            error: message.error,
        }
    }
}

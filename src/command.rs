//! Command descriptors.
//!
//! A command is the engine's argument vector (`["-i", "input.mp4", ...]`).
//! The bridge never interprets individual tokens; it only checks that the
//! vector is non-empty and made of strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated, non-empty sequence of command tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandDescriptor(Vec<String>);

impl CommandDescriptor {
    /// Build a descriptor from string tokens. Fails when there are none.
    pub fn new<I, S>(tokens: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(String::from("the command must be a non-empty list of strings"));
        }
        Ok(Self(tokens))
    }

    /// The fixed descriptor used by the trim convenience entry point.
    pub fn trim(input_name: &str, seconds: u32, output_name: &str) -> Self {
        Self(vec![
            "-i".into(),
            input_name.into(),
            "-t".into(),
            seconds.to_string(),
            "-c".into(),
            "copy".into(),
            output_name.into(),
        ])
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl TryFrom<Vec<String>> for CommandDescriptor {
    type Error = String;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(tokens)
    }
}

impl From<CommandDescriptor> for Vec<String> {
    fn from(command: CommandDescriptor) -> Self {
        command.0
    }
}

/// Anything a caller may hand over as a command before validation.
///
/// Conversion is the validator's third rule; it runs only after the payload
/// checks have passed.
pub trait CommandSource {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String>;
}

impl CommandSource for CommandDescriptor {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        Ok(self.clone())
    }
}

impl CommandSource for [String] {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        CommandDescriptor::new(self.iter().cloned())
    }
}

impl CommandSource for Vec<String> {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        self.as_slice().to_descriptor()
    }
}

impl CommandSource for [&str] {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        CommandDescriptor::new(self.iter().copied())
    }
}

impl<const N: usize> CommandSource for [&str; N] {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        self.as_slice().to_descriptor()
    }
}

impl CommandSource for Vec<&str> {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        self.as_slice().to_descriptor()
    }
}

/// Commands arriving as JSON (for example over the CLI) may hold anything.
impl CommandSource for Value {
    fn to_descriptor(&self) -> Result<CommandDescriptor, String> {
        let items = match self {
            Value::Array(items) => items,
            other => {
                return Err(format!(
                    "the command must be a list of strings, got {}",
                    json_kind(other)
                ))
            }
        };

        let mut tokens = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match item {
                Value::String(token) => tokens.push(token.clone()),
                other => {
                    return Err(format!(
                        "command element {} must be a string, got {}",
                        index,
                        json_kind(other)
                    ))
                }
            }
        }
        CommandDescriptor::new(tokens)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_empty() {
        assert!(CommandDescriptor::new(Vec::<String>::new()).is_err());
        assert!(Vec::<String>::new().to_descriptor().is_err());
        assert!(json!([]).to_descriptor().is_err());
    }

    #[test]
    fn test_keeps_order_and_content() {
        let command = ["-i", "input.mp4", "-vf", "format=gray", "output.webm"]
            .to_descriptor()
            .unwrap();
        assert_eq!(command.len(), 5);
        assert_eq!(command.tokens()[3], "format=gray");
        assert_eq!(command.to_string(), "-i input.mp4 -vf format=gray output.webm");
    }

    #[test]
    fn test_json_non_string_element() {
        let err = json!(["-i", "input.mp4", "-t", 5, "output.mp4"])
            .to_descriptor()
            .unwrap_err();
        assert!(err.contains("element 3"), "{err}");
        assert!(err.contains("a number"), "{err}");

        let err = json!("-i input.mp4").to_descriptor().unwrap_err();
        assert!(err.contains("got a string"), "{err}");
    }

    #[test]
    fn test_trim_descriptor() {
        let command = CommandDescriptor::trim("input.mp4", 10, "output.mp4");
        assert_eq!(
            command.tokens(),
            ["-i", "input.mp4", "-t", "10", "-c", "copy", "output.mp4"]
        );
    }

    #[test]
    fn test_deserialize_rejects_empty() {
        let parsed: Result<CommandDescriptor, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());
        let parsed: CommandDescriptor = serde_json::from_str(r#"["-i","a.mp4"]"#).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}

//! Request preconditions.
//!
//! Runs strictly before an envelope is built. Rules are checked in a fixed
//! order and the first failure wins:
//!
//! 1. payload is non-empty
//! 2. payload size does not exceed the ceiling
//! 3. command is a non-empty list of strings
//! 4. filename is present when the protocol variant needs one

use serde::{Deserialize, Serialize};

use crate::command::{CommandDescriptor, CommandSource};
use crate::error::BridgeError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Maximum payload size, in megabytes (MiB).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeCeiling(f64);

impl SizeCeiling {
    pub const DEFAULT_MB: f64 = 100.0;

    pub fn megabytes(mb: f64) -> Self {
        Self(mb)
    }

    pub fn as_megabytes(&self) -> f64 {
        self.0
    }

    /// True when `len` bytes is over the ceiling. A NaN ceiling admits nothing.
    pub fn is_exceeded_by(&self, len: usize) -> bool {
        let size_mb = len as f64 / BYTES_PER_MB;
        !(size_mb <= self.0)
    }
}

impl Default for SizeCeiling {
    fn default() -> Self {
        Self(Self::DEFAULT_MB)
    }
}

/// Whether the protocol variant in use needs source filename metadata.
#[derive(Debug, Clone, Copy)]
pub enum FilenameRule<'a> {
    /// Call/reply variant: a filename may ride along but is not checked.
    Optional(Option<&'a str>),
    /// State-channel variant: the engine writes the payload under this name.
    Required(&'a str),
}

/// Output of a passing validation, ready for envelope construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub command: CommandDescriptor,
    pub filename: Option<String>,
    pub ceiling: SizeCeiling,
}

pub fn validate<C>(
    payload: &[u8],
    command: &C,
    ceiling: SizeCeiling,
    filename: FilenameRule<'_>,
) -> Result<ValidatedRequest, BridgeError>
where
    C: CommandSource + ?Sized,
{
    if payload.is_empty() {
        return Err(BridgeError::EmptyPayload);
    }

    if ceiling.is_exceeded_by(payload.len()) {
        return Err(BridgeError::PayloadTooLarge {
            size_bytes: payload.len(),
            ceiling_mb: ceiling.as_megabytes(),
        });
    }

    let command = command
        .to_descriptor()
        .map_err(BridgeError::InvalidCommand)?;

    let filename = match filename {
        FilenameRule::Optional(name) => name.filter(|n| !n.is_empty()).map(str::to_owned),
        FilenameRule::Required(name) if name.is_empty() => {
            return Err(BridgeError::InvalidFilename(String::from(
                "the filename must be a non-empty string",
            )))
        }
        FilenameRule::Required(name) => Some(name.to_owned()),
    };

    Ok(ValidatedRequest {
        command,
        filename,
        ceiling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COMMAND: [&str; 2] = ["-i", "in.mp4"];

    #[test]
    fn test_accepts_well_formed_request() {
        let validated = validate(
            b"some data",
            &COMMAND,
            SizeCeiling::default(),
            FilenameRule::Required("in.mp4"),
        )
        .unwrap();
        assert_eq!(validated.command.tokens(), ["-i", "in.mp4"]);
        assert_eq!(validated.filename.as_deref(), Some("in.mp4"));
    }

    #[test]
    fn test_empty_payload() {
        let err = validate(b"", &COMMAND, SizeCeiling::default(), FilenameRule::Optional(None))
            .unwrap_err();
        assert!(matches!(err, BridgeError::EmptyPayload));
    }

    #[test]
    fn test_two_megabytes_over_one_megabyte_ceiling() {
        let payload = vec![b'a'; 2 * 1024 * 1024];
        let err = validate(
            &payload,
            &COMMAND,
            SizeCeiling::megabytes(1.0),
            FilenameRule::Required("in.mp4"),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge { size_bytes: 2_097_152, .. }));
        let msg = err.to_string();
        assert!(msg.contains("2097152"), "{msg}");
        assert!(msg.contains("1MB"), "{msg}");
    }

    #[test]
    fn test_fractional_ceiling() {
        // 1049 bytes is just over 0.001 MiB.
        let payload = vec![b'a'; 1049];
        let err = validate(
            &payload,
            &COMMAND,
            SizeCeiling::megabytes(0.001),
            FilenameRule::Optional(None),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge { .. }));

        // Exactly at the ceiling is allowed.
        let payload = vec![b'a'; 1024 * 1024];
        assert!(validate(
            &payload,
            &COMMAND,
            SizeCeiling::megabytes(1.0),
            FilenameRule::Optional(None),
        )
        .is_ok());
    }

    #[test]
    fn test_nan_ceiling_rejects() {
        assert!(SizeCeiling::megabytes(f64::NAN).is_exceeded_by(1));
    }

    #[test]
    fn test_invalid_commands() {
        let empty: Vec<String> = vec![];
        let err = validate(b"some data", &empty, SizeCeiling::default(), FilenameRule::Optional(None))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCommand(_)));
        assert!(err.to_string().contains("non-empty list of strings"));

        let mixed = json!(["-i", "in.mp4", null]);
        let err = validate(b"some data", &mixed, SizeCeiling::default(), FilenameRule::Optional(None))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCommand(_)));
    }

    #[test]
    fn test_required_filename() {
        let err = validate(b"some data", &COMMAND, SizeCeiling::default(), FilenameRule::Required(""))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidFilename(_)));
        assert!(err.to_string().contains("non-empty string"));
    }

    #[test]
    fn test_optional_empty_filename_is_dropped() {
        let validated = validate(
            b"some data",
            &COMMAND,
            SizeCeiling::default(),
            FilenameRule::Optional(Some("")),
        )
        .unwrap();
        assert_eq!(validated.filename, None);
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let empty: Vec<String> = vec![];
        // Empty payload outranks everything else.
        let err = validate(b"", &empty, SizeCeiling::megabytes(0.0), FilenameRule::Required(""))
            .unwrap_err();
        assert!(matches!(err, BridgeError::EmptyPayload));

        // Size outranks command and filename.
        let err = validate(b"x", &empty, SizeCeiling::megabytes(0.0), FilenameRule::Required(""))
            .unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge { .. }));

        // Command outranks filename.
        let err = validate(b"x", &empty, SizeCeiling::default(), FilenameRule::Required(""))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCommand(_)));
    }

    #[test]
    fn test_ceiling_boundary_across_ceilings() {
        for mb in [0.001, 0.25, 0.5, 1.0, 1.5, 2.5, 10.0, 100.0] {
            let ceiling = SizeCeiling::megabytes(mb);
            let limit = (mb * BYTES_PER_MB).floor() as usize;

            for size in [1, limit / 2, limit.saturating_sub(1), limit] {
                assert!(!ceiling.is_exceeded_by(size), "{size} bytes vs {mb}MB");
            }
            for size in [limit + 1, limit + 1024, limit * 2 + 1] {
                assert!(ceiling.is_exceeded_by(size), "{size} bytes vs {mb}MB");
            }

            if mb <= 2.5 {
                let at = vec![b'a'; limit];
                assert!(validate(&at, &COMMAND, ceiling, FilenameRule::Optional(None)).is_ok());

                let over = vec![b'a'; limit + 1];
                let err = validate(&over, &COMMAND, ceiling, FilenameRule::Optional(None)).unwrap_err();
                assert!(
                    matches!(err, BridgeError::PayloadTooLarge { size_bytes, ceiling_mb } if size_bytes == limit + 1 && ceiling_mb == mb),
                    "{err}"
                );
            }
        }
    }

    #[test]
    fn test_malformed_commands_rejected_for_any_payload() {
        let commands = [
            json!([]),
            json!("-i in.mp4"),
            json!(null),
            json!([1]),
            json!(["-i", 2]),
            json!(["-i", "in.mp4", true]),
            json!(["-i", ["nested"]]),
            json!([{"flag": "-i"}, "in.mp4"]),
        ];
        for payload in [&b"x"[..], b"some data", &[0u8; 4096]] {
            for command in &commands {
                let err = validate(payload, command, SizeCeiling::default(), FilenameRule::Optional(None))
                    .unwrap_err();
                assert!(matches!(err, BridgeError::InvalidCommand(_)), "{command}: {err}");
            }
        }
    }
}

//! Host-side bridge configuration.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::validate::SizeCeiling;

/// Defaults for the trim convenience entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Name the engine writes the payload under.
    pub input_name: String,
    /// Name the engine reads the result from.
    pub output_name: String,
    pub default_seconds: u32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            input_name: String::from("input.mp4"),
            output_name: String::from("output.mp4"),
            default_seconds: 10,
        }
    }
}

/// Policy applied to every invocation made through a [`crate::Transcoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ceiling used when the caller does not pass one (default: 100MB)
    pub size_ceiling: SizeCeiling,
    /// Prefix of every correlation key
    pub key_prefix: String,
    pub trim: TrimConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            size_ceiling: SizeCeiling::default(),
            key_prefix: String::from("transcode"),
            trim: TrimConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse from JSON. Missing keys fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| anyhow!("Invalid bridge config JSON: {}", e))?;
        if config.key_prefix.is_empty() {
            return Err(anyhow!("Invalid bridge config: key_prefix must not be empty"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.size_ceiling.as_megabytes(), 100.0);
        assert_eq!(config.trim.default_seconds, 10);
        assert_eq!(config.trim.input_name, "input.mp4");
    }

    #[test]
    fn test_partial_json() {
        let config =
            BridgeConfig::from_json_str(r#"{"size_ceiling": 25, "trim": {"output_name": "clip.webm"}}"#)
                .unwrap();
        assert_eq!(config.size_ceiling.as_megabytes(), 25.0);
        assert_eq!(config.key_prefix, "transcode");
        assert_eq!(config.trim.output_name, "clip.webm");
        assert_eq!(config.trim.input_name, "input.mp4");
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(BridgeConfig::from_json_str("{").is_err());
        assert!(BridgeConfig::from_json_str(r#"{"key_prefix": ""}"#).is_err());
    }
}

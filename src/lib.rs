//! # Transcode Bridge
//!
//! Host-side bridge to a sandboxed media-transcoding engine.
//!
//! The host validates a binary payload and a command, encodes both into a
//! request envelope, hands it to the engine over one of two protocols and
//! turns whatever comes back into a typed outcome:
//!
//! - **Call/reply**: the engine answers with a single `{output, error}` reply
//!   (or nothing at all).
//! - **State channel**: the engine sets `output`, `error` and `progress`
//!   fields and fires `complete` once.
//!
//! Every failure surfaces as a [`BridgeError`] carrying the operation, the
//! payload size, the command and a correlation key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use transcode_bridge::{BridgeConfig, Outcome, SandboxBridge, SandboxConfig, Transcoder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = SandboxBridge::new(SandboxConfig {
//!         engine_dir: "./engine".into(),
//!         ..Default::default()
//!     });
//!     let transcoder = Transcoder::new(bridge, BridgeConfig::default());
//!
//!     let video = std::fs::read("input.mp4")?;
//!     match transcoder.trim(&video, 5).await? {
//!         Outcome::Output(bytes) => std::fs::write("output.mp4", bytes)?,
//!         Outcome::NoResult => eprintln!("engine produced nothing"),
//!     }
//!     Ok(())
//! }
//! ```

mod bridge;
mod channel;
mod codec;
mod command;
mod config;
mod envelope;
mod error;
mod interpret;
mod loader;
mod ops;
mod reply;
mod runtime;
mod validate;

pub use bridge::{CallBridge, ChannelBridge, Transcoder};
pub use channel::{
    state_channel, ChannelFieldError, ChannelReader, ChannelSnapshot, ChannelWriter, Settlement,
};
pub use codec::{decode as decode_transport, encode as encode_transport};
pub use command::{CommandDescriptor, CommandSource};
pub use config::{BridgeConfig, TrimConfig};
pub use envelope::{CorrelationKey, RequestEnvelope};
pub use error::{BridgeError, CallContext, MalformedTransportError};
pub use interpret::{classify, interpret, Outcome, ReplyKind, NO_OUTPUT_PRODUCED};
pub use loader::EngineLoader;
pub use ops::{ConsoleLevel, ConsoleOutput};
pub use reply::{ReplyFields, ReplyMessage};
pub use runtime::{create_runtime, SandboxBridge, SandboxConfig};
pub use validate::{validate, FilenameRule, SizeCeiling, ValidatedRequest};

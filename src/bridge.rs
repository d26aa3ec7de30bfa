//! Bridge invoker.
//!
//! A [`Transcoder`] owns an injected bridge handle and runs the full
//! request cycle: validate, build the envelope, cross the boundary, then
//! interpret whatever came back (or didn't).
//!
//! Two protocol variants exist and a bridge may implement either or both:
//!
//! - [`CallBridge`]: one call, at most one reply (`Idle -> AwaitingReply -> Succeeded | Abandoned`)
//! - [`ChannelBridge`]: independent state fields plus a completion trigger
//!   (`Idle -> Streaming -> Completed`)

use anyhow::Result;
use async_trait::async_trait;

use crate::channel::{state_channel, ChannelWriter, Settlement};
use crate::command::{CommandDescriptor, CommandSource};
use crate::config::BridgeConfig;
use crate::envelope::RequestEnvelope;
use crate::error::{BridgeError, CallContext};
use crate::interpret::{interpret, interpret_settlement, Outcome};
use crate::reply::ReplyMessage;
use crate::validate::{validate, FilenameRule, SizeCeiling};

/// Call/reply access to a sandbox.
#[async_trait]
pub trait CallBridge: Send + Sync {
    /// Send one request and wait for its reply.
    ///
    /// `Ok(None)` means the sandbox went away without replying. `Err` is
    /// reserved for failures of the bridge itself, not of the engine.
    async fn call(&self, envelope: &RequestEnvelope) -> Result<Option<ReplyMessage>>;
}

/// State-channel access to a sandbox.
#[async_trait]
pub trait ChannelBridge: Send + Sync {
    /// Start the request and hand the sandbox the writing end of the channel.
    ///
    /// May return before or after the sandbox finishes; the invoker waits on
    /// the channel, not on this future. Dropping `channel` without
    /// completing it is how abandonment is signalled.
    async fn open(&self, envelope: &RequestEnvelope, channel: ChannelWriter) -> Result<()>;
}

/// Entry point for callers. Cheap to share; holds no per-call state.
#[derive(Debug, Clone)]
pub struct Transcoder<B> {
    bridge: B,
    config: BridgeConfig,
}

impl<B> Transcoder<B> {
    pub fn new(bridge: B, config: BridgeConfig) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn prepare<C>(
        &self,
        operation: &'static str,
        payload: &[u8],
        command: &C,
        ceiling: SizeCeiling,
        filename: FilenameRule<'_>,
    ) -> Result<(RequestEnvelope, CallContext), BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        let request = validate(payload, command, ceiling, filename)?;
        let envelope = RequestEnvelope::new(&self.config.key_prefix, payload, request);
        let context = CallContext {
            operation,
            payload_bytes: payload.len(),
            command: envelope.command().clone(),
            key: envelope.key().clone(),
        };

        tracing::info!(
            key = %context.key,
            payload_bytes = payload.len(),
            filename = envelope.filename().unwrap_or("-"),
            "processing {:.1}MB payload with command: {}",
            payload.len() as f64 / (1024.0 * 1024.0),
            context.command
        );
        Ok((envelope, context))
    }
}

impl<B: CallBridge> Transcoder<B> {
    /// Run `command` over `payload` with the configured size ceiling.
    pub async fn process<C>(&self, payload: &[u8], command: &C) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        self.process_with_ceiling(payload, command, self.config.size_ceiling, None)
            .await
    }

    /// `filename` is optional metadata on this path; an empty name is dropped.
    pub async fn process_with_ceiling<C>(
        &self,
        payload: &[u8],
        command: &C,
        ceiling: SizeCeiling,
        filename: Option<&str>,
    ) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        self.call("process", payload, command, ceiling, filename).await
    }

    /// Keep the first `seconds` of the payload, stream-copied.
    pub async fn trim(&self, payload: &[u8], seconds: u32) -> Result<Outcome, BridgeError> {
        let trim = &self.config.trim;
        let command = CommandDescriptor::trim(&trim.input_name, seconds, &trim.output_name);
        self.call("trim", payload, &command, self.config.size_ceiling, None)
            .await
    }

    /// [`Transcoder::trim`] with the configured default duration.
    pub async fn trim_default(&self, payload: &[u8]) -> Result<Outcome, BridgeError> {
        self.trim(payload, self.config.trim.default_seconds).await
    }

    /// Trim entry point that takes the caller's own command.
    pub async fn trim_with_command<C>(&self, payload: &[u8], command: &C) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        self.call("trim", payload, command, self.config.size_ceiling, None)
            .await
    }

    async fn call<C>(
        &self,
        operation: &'static str,
        payload: &[u8],
        command: &C,
        ceiling: SizeCeiling,
        filename: Option<&str>,
    ) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        let (envelope, context) =
            self.prepare(operation, payload, command, ceiling, FilenameRule::Optional(filename))?;

        let reply = self
            .bridge
            .call(&envelope)
            .await
            .map_err(|e| {
                tracing::error!(key = %context.key, error = %e, "bridge call failed in flight");
                BridgeError::unexpected(e, &context)
            })?;

        interpret(reply.map(Into::into), &context)
    }
}

impl<B: ChannelBridge> Transcoder<B> {
    /// State-channel variant of [`Transcoder::process`]. `filename` is
    /// required: the engine stores the payload under it.
    pub async fn process_channel<C>(
        &self,
        payload: &[u8],
        command: &C,
        filename: &str,
    ) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
    {
        self.process_channel_with(payload, command, filename, self.config.size_ceiling, |_| {})
            .await
    }

    /// Like [`Transcoder::process_channel`], reporting progress as it arrives.
    ///
    /// Progress is advisory: updates coalesce and the callback may never run.
    pub async fn process_channel_with<C, F>(
        &self,
        payload: &[u8],
        command: &C,
        filename: &str,
        ceiling: SizeCeiling,
        mut on_progress: F,
    ) -> Result<Outcome, BridgeError>
    where
        C: CommandSource + ?Sized,
        F: FnMut(u8),
    {
        let (envelope, context) = self.prepare(
            "process_channel",
            payload,
            command,
            ceiling,
            FilenameRule::Required(filename),
        )?;

        let (writer, mut reader) = state_channel();
        let mut progress = reader.progress();

        // The call settles on completion or abandonment. `open` may outlive
        // both and is dropped once the channel settles.
        let open = self.bridge.open(&envelope, writer);
        tokio::pin!(open);
        let mut open_pending = true;
        let mut writer_alive = true;
        let settlement = loop {
            tokio::select! {
                biased;
                settlement = reader.settled() => break settlement,
                opened = &mut open, if open_pending => {
                    open_pending = false;
                    if let Err(e) = opened {
                        // A snapshot completed before the failure is still the answer.
                        if let Some(settlement @ Settlement::Completed(_)) = reader.try_settle() {
                            tracing::warn!(key = %context.key, error = %e, "state channel failed after completion");
                            break settlement;
                        }
                        tracing::error!(key = %context.key, error = %e, "failed to open state channel");
                        return Err(BridgeError::unexpected(e, &context));
                    }
                }
                changed = progress.changed(), if writer_alive => {
                    if changed.is_err() {
                        writer_alive = false;
                        continue;
                    }
                    let latest = *progress.borrow_and_update();
                    if let Some(percent) = latest {
                        tracing::debug!(key = %context.key, progress = percent, "sandbox progress");
                        on_progress(percent);
                    }
                }
            }
        };

        interpret_settlement(settlement, &context)
    }
}

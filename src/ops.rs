//! Ops exposed to the sandboxed engine.
//!
//! Everything the engine can reach on the host side is listed in the
//! `transcode_bridge_runtime` extension at the bottom of this file:
//! console capture, the request hand-off, transport helpers and the
//! state-channel setters.

use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};

use crate::channel::ChannelWriter;
use crate::codec;

// ============================================================================
// Console Output Capture
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

/// Console lines written by the engine, in order.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub lines: Vec<(ConsoleLevel, String)>,
}

impl ConsoleOutput {
    fn push(&mut self, level: ConsoleLevel, msg: &str) {
        self.lines.push((level, msg.to_string()));
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.push(ConsoleLevel::Log, msg);
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.push(ConsoleLevel::Warn, msg);
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.push(ConsoleLevel::Error, msg);
    }
}

// ============================================================================
// Request Hand-off
// ============================================================================

/// Serialized request envelope waiting to be picked up by the bootstrap.
pub struct PendingRequest(pub String);

/// Hands the request JSON to the sandbox exactly once.
#[op2]
#[string]
pub fn op_take_request(state: &mut OpState) -> Result<String, Error> {
    state
        .try_take::<PendingRequest>()
        .map(|request| request.0)
        .ok_or_else(|| anyhow!("No pending request: the request was already taken"))
}

// ============================================================================
// Transport Ops
// ============================================================================

#[op2]
#[buffer]
pub fn op_transport_decode(#[string] text: &str) -> Result<Vec<u8>, Error> {
    codec::decode(text).map_err(Error::from)
}

#[op2]
#[string]
pub fn op_transport_encode(#[buffer] bytes: &[u8]) -> String {
    codec::encode(bytes)
}

// ============================================================================
// State Channel Ops
// ============================================================================

#[op2]
pub fn op_set_state_value(
    state: &mut OpState,
    #[string] name: String,
    #[serde] value: serde_json::Value,
) -> Result<(), Error> {
    let channel = state
        .try_borrow_mut::<ChannelWriter>()
        .ok_or_else(|| anyhow!("setStateValue is only available on the state-channel protocol"))?;
    channel.set_state_value(&name, &value)?;
    Ok(())
}

#[op2]
pub fn op_set_trigger_value(
    state: &mut OpState,
    #[string] name: String,
    #[serde] value: serde_json::Value,
) -> Result<(), Error> {
    let channel = state
        .try_borrow_mut::<ChannelWriter>()
        .ok_or_else(|| anyhow!("setTriggerValue is only available on the state-channel protocol"))?;
    channel.set_trigger_value(&name, &value)?;
    Ok(())
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    transcode_bridge_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_take_request,
        op_transport_decode,
        op_transport_encode,
        op_set_state_value,
        op_set_trigger_value,
    ],
    esm_entry_point = "ext:transcode_bridge_runtime/bootstrap.js",
    esm = ["ext:transcode_bridge_runtime/bootstrap.js" = "src/bootstrap.js"],
);

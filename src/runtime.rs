//! Sandbox runtime - runs the engine module in an isolated V8 isolate.
//!
//! Each invocation gets a fresh thread, a fresh tokio runtime and a fresh
//! isolate. The engine sees only:
//! - console.log/warn/error (captured, forwarded to host logging)
//! - `transport.encode` / `transport.decode`
//! - the request it was sent, and for the state channel the
//!   `setStateValue` / `setTriggerValue` setters
//! - module loading from the engine directory only
//!
//! If the isolate is torn down (timeout, heap exhaustion, panic) the host
//! simply never gets a reply.

use crate::bridge::{CallBridge, ChannelBridge};
use crate::channel::ChannelWriter;
use crate::envelope::RequestEnvelope;
use crate::loader::EngineLoader;
use crate::ops::{transcode_bridge_runtime, ConsoleLevel, ConsoleOutput, PendingRequest};
use crate::reply::ReplyMessage;
use anyhow::{anyhow, Error};
use async_trait::async_trait;
use deno_core::{v8, JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

const CALL_ENTRY: &str = "__transcode_bridge_call__";
const OPEN_ENTRY: &str = "__transcode_bridge_open__";
const DEFAULT_MAX_HEAP: usize = 768 * 1024 * 1024;

/// Configuration for the engine sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory containing the engine modules (only this dir is accessible)
    pub engine_dir: String,
    /// Engine entry module, relative to `engine_dir`
    pub engine_entry: String,
    /// Maximum heap size in bytes (default: 768MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Tear the sandbox down after this many milliseconds (default: 30000ms, None = never)
    pub timeout_ms: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            engine_dir: String::from("./engine"),
            engine_entry: String::from("engine.js"),
            max_heap_size: Some(DEFAULT_MAX_HEAP), // fits a request at the default 100MB ceiling
            timeout_ms: Some(30_000),              // 30 seconds default
        }
    }
}

/// Create a sandboxed JS runtime for the engine
pub fn create_runtime(config: &SandboxConfig) -> Result<JsRuntime, Error> {
    let loader = EngineLoader::new(&config.engine_dir)?;

    let create_params = config
        .max_heap_size
        .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![transcode_bridge_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());

    Ok(runtime)
}

/// Bridge handle backed by a fresh V8 isolate per invocation.
///
/// The engine module (`engine_dir/engine_entry`) exports `process(request, transport)`
/// for the call/reply protocol and `run(component)` for the state channel.
#[derive(Debug, Clone)]
pub struct SandboxBridge {
    config: Arc<SandboxConfig>,
}

impl SandboxBridge {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Serialize `envelope` and refuse it up front when the isolate could not
    /// hold it. A request that blows the heap would otherwise tear the
    /// sandbox down and come back as no result.
    fn request_for(&self, envelope: &RequestEnvelope) -> Result<String, Error> {
        let request = envelope.to_json()?;
        if let Some(max_heap) = self.config.max_heap_size {
            let needed = heap_estimate(request.len(), envelope.payload_bytes());
            if needed > max_heap {
                return Err(anyhow!(
                    "Request needs about {}MB of sandbox heap but max_heap_size is {}MB",
                    needed / (1024 * 1024),
                    max_heap / (1024 * 1024)
                ));
            }
        }
        Ok(request)
    }
}

/// Rough peak heap for one request: the request text and its parsed copy,
/// the decoded payload, and an output of the same size in bytes and text.
fn heap_estimate(request_len: usize, payload_bytes: usize) -> usize {
    let encoded = payload_bytes.div_ceil(3) * 4;
    request_len
        .saturating_mul(2)
        .saturating_add(payload_bytes.saturating_mul(2))
        .saturating_add(encoded)
}

#[async_trait]
impl CallBridge for SandboxBridge {
    async fn call(&self, envelope: &RequestEnvelope) -> Result<Option<ReplyMessage>, Error> {
        let request = self.request_for(envelope)?;
        let reply = run_isolated(self.config.clone(), CALL_ENTRY, move |state| {
            state.put(PendingRequest(request));
        })
        .await?;

        reply
            .map(|json| {
                ReplyMessage::from_json(&json)
                    .map_err(|e| anyhow!("Engine reply is not a reply object: {}", e))
            })
            .transpose()
    }
}

#[async_trait]
impl ChannelBridge for SandboxBridge {
    async fn open(&self, envelope: &RequestEnvelope, channel: ChannelWriter) -> Result<(), Error> {
        let request = self.request_for(envelope)?;
        // The writer lives in the isolate's op state and is dropped with it,
        // which abandons the channel if the engine never completed.
        run_isolated(self.config.clone(), OPEN_ENTRY, move |state| {
            state.put(PendingRequest(request));
            state.put(channel);
        })
        .await?;
        Ok(())
    }
}

/// Run one bootstrap entry point on its own sandbox thread.
///
/// Resolves to `Ok(None)` when the entry point resolved to null or when the
/// sandbox went away without answering.
async fn run_isolated<S>(
    config: Arc<SandboxConfig>,
    entry: &'static str,
    seed: S,
) -> Result<Option<String>, Error>
where
    S: FnOnce(&mut OpState) + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name(String::from("transcode-sandbox"))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(anyhow!("Failed to start sandbox runtime: {}", e)));
                    return;
                }
            };
            let result = rt.block_on(sandbox_session(&config, entry, seed));
            let _ = tx.send(result);
        })
        .map_err(|e| anyhow!("Failed to spawn sandbox thread: {}", e))?;

    match rx.await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("sandbox thread ended without replying");
            Ok(None)
        }
    }
}

async fn sandbox_session<S>(
    config: &SandboxConfig,
    entry: &'static str,
    seed: S,
) -> Result<Option<String>, Error>
where
    S: FnOnce(&mut OpState),
{
    let mut runtime = create_runtime(config)?;
    let engine = EngineLoader::new(&config.engine_dir)?.entry_specifier(&config.engine_entry)?;
    seed(&mut runtime.op_state().borrow_mut());

    let torn_down = Arc::new(AtomicBool::new(false));

    // Terminate instead of letting V8 abort the process; the extra headroom
    // lets termination unwind.
    if config.max_heap_size.is_some() {
        let isolate_handle = runtime.v8_isolate().thread_safe_handle();
        let flag = torn_down.clone();
        runtime.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "sandbox near heap limit; tearing down"
            );
            flag.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
            current * 2
        });
    }

    let watchdog = config.timeout_ms.map(|ms| {
        let isolate_handle = runtime.v8_isolate().thread_safe_handle();
        let flag = torn_down.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            flag.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
        })
    });

    let script = format!(
        "globalThis.{}({})",
        entry,
        serde_json::to_string(engine.as_str())?
    );
    let result = evaluate(&mut runtime, script).await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    forward_console(&mut runtime);

    if torn_down.load(Ordering::SeqCst) {
        tracing::warn!(engine = %engine, "sandbox torn down before replying");
        return Ok(None);
    }
    result
}

/// Run `script`, drive the event loop, and read back what it resolved to.
async fn evaluate(runtime: &mut JsRuntime, script: String) -> Result<Option<String>, Error> {
    let global = runtime.execute_script("<transcode-bridge>", script)?;

    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, &global);

    let value = match v8::Local::<v8::Promise>::try_from(local) {
        Ok(promise) => match promise.state() {
            v8::PromiseState::Fulfilled => promise.result(scope),
            v8::PromiseState::Rejected => {
                let exception = promise.result(scope);
                return Err(anyhow!(
                    "Sandbox bootstrap threw: {}",
                    exception.to_rust_string_lossy(scope)
                ));
            }
            v8::PromiseState::Pending => {
                return Err(anyhow!("Sandbox bootstrap returned an unresolved promise"));
            }
        },
        Err(_) => local,
    };

    if value.is_null_or_undefined() {
        Ok(None)
    } else if value.is_string() {
        Ok(Some(value.to_rust_string_lossy(scope)))
    } else {
        Err(anyhow!("Sandbox bootstrap must resolve to a string or null"))
    }
}

fn forward_console(runtime: &mut JsRuntime) {
    let state = runtime.op_state();
    let state = state.borrow();
    let Some(console) = state.try_borrow::<ConsoleOutput>() else {
        return;
    };
    for (level, line) in &console.lines {
        match level {
            ConsoleLevel::Log => tracing::debug!(target: "transcode_bridge::sandbox", "{}", line),
            ConsoleLevel::Warn => tracing::warn!(target: "transcode_bridge::sandbox", "{}", line),
            ConsoleLevel::Error => tracing::error!(target: "transcode_bridge::sandbox", "{}", line),
        }
    }
}

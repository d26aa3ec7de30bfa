//! Transcode Bridge CLI
//!
//! Call/reply mode:
//!   transcode-bridge <engine-dir> <input> <output> -- <command...>
//!
//! State-channel mode (prints progress to stderr):
//!   transcode-bridge --channel <engine-dir> <input> <output> -- <command...>
//!
//! Trim mode:
//!   transcode-bridge --trim <seconds> <engine-dir> <input> <output>
//!
//! Exit status: 0 when output was written, 2 when the engine produced no
//! result, 1 on any error.

use anyhow::{anyhow, Context, Result};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use transcode_bridge::{BridgeConfig, Outcome, SandboxBridge, SandboxConfig, Transcoder};

const EXIT_NO_RESULT: u8 = 2;

fn print_usage() {
    eprintln!("Transcode Bridge - run a sandboxed transcoding engine on a file");
    eprintln!();
    eprintln!("Call/reply mode:");
    eprintln!("  transcode-bridge <engine-dir> <input> <output> -- <command...>");
    eprintln!();
    eprintln!("State-channel mode:");
    eprintln!("  transcode-bridge --channel <engine-dir> <input> <output> -- <command...>");
    eprintln!();
    eprintln!("Trim mode:");
    eprintln!("  transcode-bridge --trim <seconds> <engine-dir> <input> <output>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG                   log filter (default: info)");
    eprintln!("  TRANSCODE_BRIDGE_CONFIG    path to a bridge config JSON file");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  transcode-bridge ./engine in.mp4 out.mp4 -- -i input.mp4 -t 5 output.mp4");
    eprintln!("  transcode-bridge --trim 5 ./engine in.mp4 out.mp4");
}

enum Mode {
    Call,
    Channel,
    Trim(u32),
}

struct Invocation {
    mode: Mode,
    engine_dir: String,
    input: String,
    output: String,
    command: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let (mode, rest) = match args.first().map(String::as_str) {
        Some("--channel") => (Mode::Channel, &args[1..]),
        Some("--trim") => {
            let seconds = args
                .get(1)
                .ok_or_else(|| anyhow!("Trim mode requires a duration in seconds"))?;
            let seconds = seconds
                .parse()
                .map_err(|e| anyhow!("Invalid trim duration '{}': {}", seconds, e))?;
            (Mode::Trim(seconds), &args[2..])
        }
        _ => (Mode::Call, args),
    };

    if rest.len() < 3 {
        return Err(anyhow!("Missing required arguments"));
    }

    let command = match mode {
        Mode::Trim(_) => Vec::new(),
        _ => match rest.get(3).map(String::as_str) {
            Some("--") => rest[4..].to_vec(),
            _ => return Err(anyhow!("Expected `--` followed by the engine command")),
        },
    };

    Ok(Invocation {
        mode,
        engine_dir: rest[0].clone(),
        input: rest[1].clone(),
        output: rest[2].clone(),
        command,
    })
}

fn load_bridge_config() -> Result<BridgeConfig> {
    match std::env::var("TRANSCODE_BRIDGE_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read bridge config '{}'", path))?;
            BridgeConfig::from_json_str(&json)
        }
        Err(_) => Ok(BridgeConfig::default()),
    }
}

async fn run(invocation: Invocation) -> Result<Outcome> {
    let payload = std::fs::read(&invocation.input)
        .with_context(|| format!("Failed to read input '{}'", invocation.input))?;

    let bridge = SandboxBridge::new(SandboxConfig {
        engine_dir: invocation.engine_dir.clone(),
        ..Default::default()
    });
    let transcoder = Transcoder::new(bridge, load_bridge_config()?);

    let outcome = match invocation.mode {
        Mode::Call => transcoder.process(&payload, &invocation.command).await?,
        Mode::Channel => {
            let filename = transcoder.config().trim.input_name.clone();
            transcoder
                .process_channel_with(
                    &payload,
                    &invocation.command,
                    &filename,
                    transcoder.config().size_ceiling,
                    |percent| eprintln!("[progress] {}%", percent),
                )
                .await?
        }
        Mode::Trim(seconds) => transcoder.trim(&payload, seconds).await?,
    };

    if let Outcome::Output(bytes) = &outcome {
        std::fs::write(&invocation.output, bytes)
            .with_context(|| format!("Failed to write output '{}'", invocation.output))?;
    }
    Ok(outcome)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            print_usage();
            eprintln!();
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let output = invocation.output.clone();

    match run(invocation).await {
        Ok(Outcome::Output(bytes)) => {
            eprintln!("Wrote {} bytes to {}", bytes.len(), output);
            ExitCode::SUCCESS
        }
        Ok(Outcome::NoResult) => {
            eprintln!("The engine produced no result");
            ExitCode::from(EXIT_NO_RESULT)
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

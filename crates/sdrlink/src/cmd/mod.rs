use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use sdrlink_stream::IoConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode one packet and print its header.
    Decode(DecodeArgs),
    /// Print async events reported by a device's transmit DSP.
    Listen(ListenArgs),
    /// Transmit a test tone under flow control.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, config: &IoConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Listen(args) => listen::run(args, config, format),
        Command::Send(args) => send::run(args, config, format),
        Command::Version(args) => version::run(args),
    }
}

/// Load `path` as JSON, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> CliResult<IoConfig> {
    let Some(path) = path else {
        return Ok(IoConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Packet bytes as hex (whitespace allowed).
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read packet bytes from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Device transmit DSP address (host:port).
    pub device: SocketAddr,
    /// Local address to bind. Default: ephemeral port.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stop after this long (e.g. 10s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Datagram frame size in bytes.
    #[arg(long, default_value_t = sdrlink_transport::DEFAULT_FRAME_SIZE)]
    pub frame_size: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Device transmit DSP address (host:port).
    pub device: SocketAddr,
    /// Samples to transmit.
    #[arg(long, default_value_t = 100_000)]
    pub samples: usize,
    /// Tone frequency as a fraction of the sample rate.
    #[arg(long, default_value_t = 0.01)]
    pub tone: f32,
    /// Tone amplitude, full scale 1.0.
    #[arg(long, default_value_t = 0.5)]
    pub amplitude: f32,
    /// Stream arguments (e.g. "noclear,underflow_policy=next_burst").
    #[arg(long, default_value = "")]
    pub args: String,
    /// Flow-control wait per send call (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    /// Datagram frame size in bytes.
    #[arg(long, default_value_t = sdrlink_transport::DEFAULT_FRAME_SIZE)]
    pub frame_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Print build details.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn documented_stream_args_example_applies_both_options() {
        let args: sdrlink_stream::StreamArgs = "noclear,underflow_policy=next_burst".parse().unwrap();
        assert!(!args.clear);
        assert_eq!(
            args.underflow_policy,
            Some(sdrlink_stream::UnderflowPolicy::NextBurst)
        );
    }

    #[test]
    fn missing_config_path_gives_defaults() {
        assert_eq!(load_config(None).unwrap(), IoConfig::default());
    }

    #[test]
    fn partial_config_file_keeps_other_defaults() {
        let path = std::env::temp_dir().join(format!("sdrlink-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"event_queue_depth": 8, "listener_poll_ms": 20}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.event_queue_depth, 8);
        assert_eq!(config.listener_poll_ms, 20);
        assert_eq!(config.device_buffer_bytes, IoConfig::default().device_buffer_bytes);

        std::fs::write(&path, "{not json").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        let _ = std::fs::remove_file(&path);
    }
}

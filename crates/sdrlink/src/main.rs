mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sdrlink", version, about = "Networked SDR streaming CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// I/O configuration file (JSON).
    #[arg(long, value_name = "PATH", global = true, env = "SDRLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::load_config(cli.config.as_deref())
        .and_then(|config| cmd::run(cli.command, &config, format));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "sdrlink",
            "send",
            "127.0.0.1:49153",
            "--samples",
            "4096",
            "--args",
            "underflow_policy=next_burst",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_decode_inputs() {
        let err = Cli::try_parse_from([
            "sdrlink",
            "decode",
            "10000004",
            "--file",
            "/tmp/packet.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sdrlink",
            "listen",
            "127.0.0.1:49153",
            "--config",
            "/etc/sdrlink.json",
            "--timeout",
            "3s",
        ])
        .expect("listen args should parse");
        assert!(matches!(cli.command, Command::Listen(_)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sdrlink.json")));
    }
}

pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slackwire_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "slackwire",
    about = "Slackwire socket mode operator CLI",
    long_about = "Decode interaction payloads, replay captured socket mode envelopes through the router, and inspect configuration.",
    after_help = "Examples:\n  slackwire decode payload.json\n  slackwire replay capture.ndjson\n  slackwire config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Decode an interactive payload JSON file and summarize it")]
    Decode {
        #[arg(help = "Path to a JSON file holding one interactive payload")]
        path: PathBuf,
    },
    #[command(about = "Feed newline-delimited socket mode envelopes through the router")]
    Replay {
        #[arg(help = "Path to a file with one raw envelope per line")]
        path: PathBuf,
        #[arg(long, help = "Override socket.ack_timeout_ms for this replay")]
        ack_timeout_ms: Option<u64>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Decode { path } => commands::decode::run(&path),
        Command::Replay { path, ack_timeout_ms } => commands::replay::run(&path, ack_timeout_ms),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command output on stdout stays machine readable.
fn init_logging() {
    use tracing::Level;

    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

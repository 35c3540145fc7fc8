//! # CLI Interface
//!
//! Defines the command-line argument structure for `wardrobe-server` using
//! `clap` derive. Every runtime setting also reads a `WARDROBE_*`
//! environment variable.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use wardrobe_core::config::{DEFAULT_HTTP_PORT, DEFAULT_METRICS_PORT, SESSION_TTL};

use crate::logging::LogFormat;

/// Wardrobe marketplace server.
///
/// Serves the transaction lifecycle API over HTTP and WebSocket, and
/// exposes Prometheus metrics on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "wardrobe-server",
    about = "Wardrobe marketplace server",
    version,
    propagate_version = true
)]
pub struct WardrobeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the API server.
    Run(RunArgs),
    /// Initialize a data directory and generate the session signing key.
    Init(InitArgs),
    /// Issue a session token for a user id.
    Token(TokenArgs),
    /// Print version information and exit.
    Version,
}

/// Where transactional mail goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum NotifierKind {
    /// Log notifications and drop them.
    Log,
    /// Queue notifications in the database outbox.
    #[default]
    Outbox,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding the database, uploads and session key.
    #[arg(long, short = 'd', env = "WARDROBE_DATA_DIR", default_value = "./wardrobe-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP and WebSocket API.
    #[arg(long, env = "WARDROBE_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "WARDROBE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Hex-encoded session signing key.
    ///
    /// If not provided, the key is read from the data directory.
    #[arg(long, env = "WARDROBE_SESSION_KEY", hide_env_values = true)]
    pub session_key: Option<String>,

    /// Log output format.
    #[arg(long, env = "WARDROBE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Notification backend.
    #[arg(long, env = "WARDROBE_NOTIFIER", value_enum, default_value_t = NotifierKind::Outbox)]
    pub notifier: NotifierKind,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "WARDROBE_DATA_DIR", default_value = "./wardrobe-data")]
    pub data_dir: PathBuf,

    /// Replace an existing session key. Invalidates every issued token.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `token` subcommand.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// User id the token identifies.
    pub user_id: u64,

    /// Data directory holding the session key.
    #[arg(long, short = 'd', env = "WARDROBE_DATA_DIR", default_value = "./wardrobe-data")]
    pub data_dir: PathBuf,

    /// Hex-encoded session signing key, overriding the key file.
    #[arg(long, env = "WARDROBE_SESSION_KEY", hide_env_values = true)]
    pub session_key: Option<String>,

    /// Token lifetime in hours.
    #[arg(long, default_value_t = SESSION_TTL.as_secs() / 3600)]
    pub ttl_hours: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        WardrobeCli::command().debug_assert();
    }

    #[test]
    fn token_subcommand_parses_user_id() {
        let cli = WardrobeCli::parse_from(["wardrobe-server", "token", "42", "--ttl-hours", "1"]);
        match cli.command {
            Commands::Token(args) => {
                assert_eq!(args.user_id, 42);
                assert_eq!(args.ttl_hours, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn token_lifetime_defaults_to_session_ttl() {
        let cli = WardrobeCli::parse_from(["wardrobe-server", "token", "7"]);
        match cli.command {
            Commands::Token(args) => assert_eq!(args.ttl_hours * 3600, SESSION_TTL.as_secs()),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_accepts_json_logs_and_log_notifier() {
        let cli = WardrobeCli::parse_from([
            "wardrobe-server",
            "run",
            "--log-format",
            "json",
            "--notifier",
            "log",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.log_format, LogFormat::Json);
                assert_eq!(args.notifier, NotifierKind::Log);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

//! Command-line flags

use std::path::PathBuf;

use clap::Parser;

use crate::config::BatchFailurePolicy;

/// Flags override `config.toml` and `SQUID_FETCH__*` environment values.
#[derive(Parser, Debug)]
#[command(
    name = "squid-fetch",
    version,
    about = "Load new Squid access log lines into the report warehouse and refresh hourly rollups"
)]
pub struct Cli {
    /// Path to the config file (optional)
    #[arg(long, default_value = "config.toml")]
    pub config: String,

    /// Database type: sqlite, mysql or postgres
    #[arg(long = "typedb")]
    pub typedb: Option<String>,

    /// Full database URL, takes precedence over host/user/password/name
    #[arg(long)]
    pub url: Option<String>,

    /// Database user
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Database password
    #[arg(short = 'p', long = "password")]
    pub password: Option<String>,

    /// Database host
    #[arg(short = 'H', long = "host")]
    pub host: Option<String>,

    /// Database name (file path for sqlite)
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Squid access log to load
    #[arg(long = "log")]
    pub log_file: Option<PathBuf>,

    /// Lines per staging insert
    #[arg(long = "batch-size", visible_alias = "nl")]
    pub batch_size: Option<usize>,

    /// Proxy number the log belongs to
    #[arg(long = "proxy", visible_alias = "np")]
    pub proxy_id: Option<i64>,

    /// Verbosity: 0 silent, 1 errors, 2 warnings, 3 info, 4 debug
    #[arg(long = "debug")]
    pub verbosity: Option<u8>,

    /// Single-instance PID file
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// What to do when a staging batch cannot be written
    #[arg(long = "on-batch-error", value_enum)]
    pub on_batch_error: Option<BatchFailurePolicy>,
}

/// Log level name for a numeric verbosity.
pub fn verbosity_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        _ => "debug",
    }
}

//! Command-line front end.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "smax-postgresd", about = "Mirrors SMA-X shared variables into PostgreSQL", disable_version_flag = true)]
pub struct Cli {
    /// Path to the config file.
    #[arg(short, long, env = "SMAX_POSTGRES_CONFIG", default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Create the configured database and role, then exit.
    #[arg(short, long)]
    pub bootstrap: bool,

    /// Admin user to connect as when bootstrapping.
    #[arg(short, long, default_value = "postgres")]
    pub admin_user: String,

    /// Password for the daemon's SQL role, used only with `--bootstrap`.
    #[arg(short, long)]
    pub password: Option<String>,

    /// Verbose/debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: (),
}

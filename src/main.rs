//! Entry point: loads config, bootstraps or runs the daemon, and drives
//! graceful shutdown.

use anyhow::Result;
use clap::Parser;
use smax_postgres::cli::Cli;
use smax_postgres::{config::Config, daemon::Daemon, dbconn, notify, signals};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "info" }));

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_target(false)
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(env_filter)
            .init();
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    notify::status("INITIALIZE");
    let config = Config::load(&cli.config)?;

    if cli.bootstrap {
        notify::status("BOOTSTRAP");
        let password = cli
            .password
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--password is required with --bootstrap"))?;
        let admin_opts = dbconn::connect_options(&config.sql_server, "postgres", &cli.admin_user, Some(password));
        dbconn::bootstrap(admin_opts, &config.sql_db, &config.sql_user, password).await?;
        tracing::info!(db = %config.sql_db, user = %config.sql_user, "bootstrap complete");
        return Ok(());
    }

    tracing::info!(smax = %config.smax_server, sql = %config.sql_server, "starting");
    let daemon = Daemon::new(config).await?;
    notify::ready();
    notify::status("IDLE");

    tokio::select! {
        res = daemon.run() => {
            res?;
        }
        _ = signals::wait_for_shutdown() => {
            notify::stopping();
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

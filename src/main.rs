//! systemctl-bot entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Connect to the system bus
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run the Discord client until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use systemctl_bot::error::AppError;
use systemctl_bot::systemd::dbus::DbusSystemd;
use systemctl_bot::units::Command;
use systemctl_bot::{config, discord, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        application_id = config.application_id,
        guild_id = config.guild_id,
        command_shape = ?config.command_shape,
        effective_log_level = %effective_log_level,
        job_timeout = ?config.job_timeout,
        status_units = config.units.units(Command::Status).len(),
        "config loaded"
    );

    let systemd = Arc::new(DbusSystemd::connect().await?);
    info!("connected to systemd");

    // Shared shutdown token. Ctrl-C cancels it and every task watches it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    discord::run(config, systemd, shutdown.clone()).await?;
    shutdown.cancel();

    info!("bye");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: systemctl-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!(
                    "  -c, --config <PATH>        Path to configuration file (default: {})",
                    config::DEFAULT_CONFIG_PATH
                );
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-c" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -c/--config requires a path argument");
                    std::process::exit(10);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a => {
                if let Some(count) = logger::verbosity_flags(a) {
                    verbosity = verbosity.saturating_add(count);
                }
            }
        }
    }

    CliArgs { log_level: logger::level_for_verbosity(verbosity), config_path }
}

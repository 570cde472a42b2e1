use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use tokio::signal;

use ringctl::orchestrator::config::{create_sample_config, load_config};
use ringctl::orchestrator::startup::OrchestratorBuilder;

/// Wait for shutdown signal (CTRL+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received CTRL+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

fn cli() -> Command {
    Command::new("ringctl-orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ringctl - fleet-wide maintenance orchestrator for database rings")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/orchestrator.toml"),
        )
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .value_name("URL")
                .help("PostgreSQL connection string for the task store"),
        )
        .arg(
            Arg::new("tick-interval-ms")
                .long("tick-interval-ms")
                .value_name("MILLIS")
                .help("Interval between plan driver ticks"),
        )
        .arg(
            Arg::new("request-timeout-ms")
                .long("request-timeout-ms")
                .value_name("MILLIS")
                .help("Timeout of a single node agent call"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (error, warn, info, debug, trace)"),
        )
        .arg(
            Arg::new("write-sample-config")
                .long("write-sample-config")
                .value_name("FILE")
                .help("Write a sample configuration file and exit"),
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .action(ArgAction::SetTrue)
                .help("Validate the configuration and exit"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if let Some(path) = matches.get_one::<String>("write-sample-config") {
        return create_sample_config(path);
    }

    let config_path = matches.get_one::<String>("config");
    let config = load_config(config_path.map(|s| s.as_str()), &matches)?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", config.log_level.as_deref().unwrap_or("warn"));
    }
    env_logger::init();
    if matches.get_flag("check-config") {
        println!("Configuration OK");
        return Ok(());
    }

    let builder = OrchestratorBuilder::new(config);
    let engine = builder.create_engine().await?;
    let orchestrator = builder.build(engine);

    orchestrator.serve_with_shutdown(shutdown_signal()).await?;

    log::info!("ringctl orchestrator shutdown complete");
    Ok(())
}

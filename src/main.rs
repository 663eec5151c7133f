use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokentrack::config::{format_timeout, Command, Config, LogLevel, Settings};
use tokentrack::pidfile::PidFile;
use tokentrack::web::WebServer;
use tokentrack_core::tracker::{FsNotifier, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);

    if let Some(Command::Analyze { path }) = &cli.command {
        return tokentrack::analyze::run(path, settings.cache_drop_threshold);
    }

    // Setup logging
    setup_logging(settings.log_level);

    let tracker_settings = settings.tracker_settings()?;
    let pid_file = PidFile::acquire(settings.pid_file_path()?)?;

    let registry = Arc::new(Registry::new(tracker_settings, Arc::new(FsNotifier)));
    registry.spawn_sweepers();

    tracing::info!(
        "Token tracker starting (PID {}, port {}, timeout {}, idle-timeout {})",
        std::process::id(),
        settings.port,
        format_timeout(registry.settings().session_timeout),
        format_timeout(registry.settings().idle_timeout),
    );

    let mut shutdown = registry.shutdown_signal();
    let server = WebServer::new(settings.port, registry.clone());

    let result = tokio::select! {
        result = server.run() => result,
        _ = shutdown.wait_for(|&requested| requested) => {
            tracing::info!("Shutting down");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            registry.stop_all();
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!("Server error: {:#}", e);
    }

    // process::exit skips destructors, so release the PID file first
    drop(pid_file);
    std::process::exit(if result.is_ok() { 0 } else { 1 });
}

fn setup_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Silent => return,
        LogLevel::Debug => EnvFilter::new("tokentrack=debug,tokentrack_core=debug"),
        LogLevel::Info => EnvFilter::new("tokentrack=info,tokentrack_core=info"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

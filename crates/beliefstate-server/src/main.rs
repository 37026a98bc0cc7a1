use std::path::PathBuf;
use std::process::ExitCode;

use beliefstate_core::{Beliefstate, ShutdownHandle};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "beliefstate", version)]
#[command(about = "Plugin host tracking the belief state of a robot", long_about = None)]
struct Args {
    /// Configuration file. Falls back to the default locations when absent
    /// or unparsable.
    config: Option<PathBuf>,

    /// Log filter (e.g. `debug`, `beliefstate_core=trace`); overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Extra arguments for plugins, given after `--`
    #[arg(last = true, value_name = "PLUGIN_ARGS")]
    plugin_args: Vec<String>,
}

fn env_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter(args.log_level.as_deref()))
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        plugin_args = ?args.plugin_args,
        "starting beliefstate"
    );

    // plugins get the untouched process arguments
    let argv: Vec<String> = std::env::args().collect();
    let host = match Beliefstate::init(args.config.as_deref(), argv) {
        Ok(host) => host,
        Err(e) => {
            tracing::error!("initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(path) = host.config_path() {
        tracing::info!(config = %path.display(), "initialization complete, entering main loop");
    }

    tokio::spawn(shutdown_signal(host.shutdown_handle()));

    let scheduler = tokio::task::spawn_blocking(move || {
        let mut host = host;
        host.run();
        host.deinit();
    });

    match scheduler.await {
        Ok(()) => {
            tracing::info!("exiting gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("scheduler thread failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Trigger the shutdown handle on SIGINT or SIGTERM.
async fn shutdown_signal(handle: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }

    handle.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["beliefstate"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
        assert!(args.plugin_args.is_empty());
    }

    #[test]
    fn test_args_config_and_plugin_args() {
        let args = Args::try_parse_from([
            "beliefstate",
            "/etc/beliefstate/config.toml",
            "--log-level",
            "debug",
            "--",
            "--robot",
            "pr2",
        ])
        .unwrap();
        assert_eq!(
            args.config,
            Some(PathBuf::from("/etc/beliefstate/config.toml"))
        );
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.plugin_args, ["--robot", "pr2"]);
    }

    #[test]
    fn test_args_reject_unknown_flag() {
        assert!(Args::try_parse_from(["beliefstate", "--frobnicate"]).is_err());
    }

    #[test]
    fn test_env_filter_prefers_explicit_level() {
        assert_eq!(env_filter(Some("warn")).to_string(), "warn");
    }
}

//! Benana host runtime.
//!
//! HTTP server, plugin lifecycle, and plugin management commands.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use benana_kernel::config::Config;
use benana_kernel::plugin::cli;
use benana_kernel::routes;
use benana_kernel::state::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "benana", author, version, about = "Benana plugin host runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Manage plugins without starting the server.
    Plugin {
        #[command(subcommand)]
        action: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List installed plugins with their status.
    List,

    /// Apply pending migrations for a plugin.
    Migrate { name: String },

    /// Revert a plugin's most recent migrations.
    Rollback {
        name: String,

        /// Number of migrations to revert.
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Show a plugin's status and migrations.
    Status { name: String },

    /// Disable a plugin so the server does not load it on start.
    Disable { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Plugin { action } => run_plugin_command(&config, action).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Benana host runtime");
    info!(
        port = config.port,
        plugins_dir = %config.plugins_dir.display(),
        "Configuration loaded"
    );

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let report = state
        .plugins()
        .autoload_active()
        .await
        .context("failed to read plugin state")?;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "some plugins did not load");
    }

    let app = routes::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.plugins().shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn run_plugin_command(config: &Config, action: PluginCommand) -> Result<()> {
    let manager = state::connect_for_cli(config).await?;

    match action {
        PluginCommand::List => cli::cmd_plugin_list(&manager).await,
        PluginCommand::Migrate { name } => cli::cmd_plugin_migrate(&manager, &name).await,
        PluginCommand::Rollback { name, steps } => {
            cli::cmd_plugin_rollback(&manager, &name, steps).await
        }
        PluginCommand::Status { name } => cli::cmd_plugin_status(&manager, &name).await,
        PluginCommand::Disable { name } => cli::cmd_plugin_disable(&manager, &name).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

//! csp-tracker - survey submission lifecycle backend
//!
//! Serves the submission API (start / complete / abandon) over SQLite.

use anyhow::{Context, Result};
use clap::Parser;
use csp_common::config::{load_toml_config, resolve_config_path, resolve_root_folder};
use csp_common::logging;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use csp_tracker::{build_router, db, AppState};

#[derive(Parser, Debug)]
#[command(version, about = "Survey submission lifecycle backend")]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data root folder
    #[arg(short, long, env = "CSP_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides [tracker] port)
    #[arg(short, long, env = "CSP_TRACKER_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides [tracker] database_path)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (filter, log_level) = logging::bootstrap_filter();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting CSP Submission Tracker (csp-tracker) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_toml_config(config_path.as_deref()).context("Failed to load config")?;
    if let Err(e) = log_level.apply(&config.logging.level) {
        warn!(error = %e, "Keeping bootstrap log level");
    }

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    let db_path = args
        .database
        .or_else(|| config.tracker.database_path.clone())
        .unwrap_or_else(|| root_folder.join("csp-tracker.db"));
    info!("Database path: {}", db_path.display());

    let pool = db::init_database(&db_path)
        .await
        .context("Failed to open tracker database")?;

    let app = build_router(AppState::new(pool));

    let port = args.port.unwrap_or(config.tracker.port);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("csp-tracker listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! csp-reports - survey report store and dashboard
//!
//! `serve` runs the dashboard API; the other subcommands print statistics
//! for a scope as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csp_common::config::{load_toml_config, resolve_config_path, resolve_root_folder, TomlConfig};
use csp_common::{logging, time};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use csp_reports::aggregate::{self, Granularity, Window};
use csp_reports::lister::{into_reports, ListScope};
use csp_reports::pagination::{calculate_pagination, page_of};
use csp_reports::{
    build_router, AppState, EnrichmentPipeline, FsObjectStore, ReportCache, ReportLister,
    ReportWriter,
};

#[derive(Parser, Debug)]
#[command(version, about = "Survey report store and dashboard")]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data root folder
    #[arg(short, long, global = true, env = "CSP_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Object store directory (overrides [reports] store_root)
    #[arg(long, global = true, env = "CSP_STORE_ROOT")]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dashboard API (default)
    Serve {
        /// Port to listen on (overrides [reports] port)
        #[arg(short, long, env = "CSP_REPORTS_PORT")]
        port: Option<u16>,
    },
    /// Print overview statistics and the per-workspace breakdown
    Overview {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Print submission counts over time
    Trend {
        #[command(flatten)]
        scope: ScopeArgs,
        /// hour, day, week or month
        #[arg(long, default_value = "day")]
        granularity: String,
        /// Look-back window such as 7d
        #[arg(long, default_value = "7d")]
        window: String,
    },
    /// Print one page of reports, newest first
    List {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

#[derive(clap::Args, Debug)]
struct ScopeArgs {
    #[arg(long)]
    workspace: Option<String>,
    /// Survey folder (requires --workspace)
    #[arg(long)]
    survey: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> csp_common::Result<ListScope> {
        ListScope::from_filters(self.workspace.as_deref(), self.survey.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries command output, so logs go to stderr
    let (filter, log_level) = logging::bootstrap_filter();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting CSP Reports (csp-reports) v{} [{}] built {} ({})",
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
    let store_root = args
        .store_root
        .clone()
        .or_else(|| config.reports.store_root.clone())
        .unwrap_or_else(|| root_folder.join("store"));
    info!("Object store: {}", store_root.display());

    let store = Arc::new(
        FsObjectStore::open(store_root.clone())
            .await
            .context("Failed to open object store")?,
    );
    let writer = ReportWriter::new(store.clone(), config.analysis.merge_max_attempts);
    let lister = ReportLister::new(store, config.reports.listing_concurrency);

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(&config, lister, writer, port).await,
        Command::Overview { scope } => {
            let reports = into_reports(lister.list_scope(&scope.scope()?, &Default::default()).await?);
            print_json(&serde_json::json!({
                "overview": aggregate::overview(&reports),
                "workspaces": aggregate::workspace_breakdown(&reports),
            }))
        }
        Command::Trend {
            scope,
            granularity,
            window,
        } => {
            let granularity: Granularity = granularity.parse()?;
            let window: Window = window.parse()?;
            let reports = into_reports(lister.list_scope(&scope.scope()?, &Default::default()).await?);
            let buckets =
                aggregate::time_series(&reports, granularity, window, time::now().fixed_offset());
            print_json(&serde_json::json!({
                "granularity": granularity,
                "window": window.to_string(),
                "buckets": buckets,
            }))
        }
        Command::List { scope, page } => {
            let mut entries = lister.list_scope(&scope.scope()?, &Default::default()).await?;
            csp_reports::lister::sort_entries_by_recency(&mut entries);
            let pagination = calculate_pagination(entries.len(), page);
            print_json(&serde_json::json!({
                "page": pagination.page,
                "totalPages": pagination.total_pages,
                "total": pagination.total,
                "reports": page_of(&entries, &pagination),
            }))
        }
    }
}

async fn serve(
    config: &TomlConfig,
    lister: ReportLister,
    writer: ReportWriter,
    port: Option<u16>,
) -> Result<()> {
    let pipeline = EnrichmentPipeline::from_config(&config.analysis, writer.clone())
        .context("Failed to set up analysis client")?;
    match &config.analysis.endpoint {
        Some(endpoint) if pipeline.is_some() => info!("Analysis endpoint: {}", endpoint),
        _ => warn!("No analysis endpoint configured, reports will not be enriched"),
    }

    let cache = Arc::new(ReportCache::new(std::time::Duration::from_secs(
        config.reports.listing_cache_ttl_secs,
    )));
    let state = AppState::new(lister, writer, cache, pipeline);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let port = port.unwrap_or(config.reports.port);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("csp-reports listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

//! dockyard submission build server

use clap::Parser;
use dockyard_api::{AppState, routes};
use dockyard_config::{BuilderConfig, load_builder_config};
use dockyard_core::TeamId;
use dockyard_core::engine::ContainerEngine;
use dockyard_core::store::SubmissionStore;
use dockyard_db::{MemorySubmissionStore, PgSubmissionStore, create_pool, run_migrations};
use dockyard_engine::DockerEngine;
use dockyard_registry::RegistryClient;
use dockyard_scheduler::Scheduler;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dockyard-server")]
#[command(about = "Builds team submissions into container images", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, env = "DOCKYARD_CONFIG", default_value = "dockyard.kdl")]
    config: PathBuf,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Address to listen on
    #[arg(long, env = "DOCKYARD_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Keep submissions in memory instead of PostgreSQL
    #[arg(long)]
    memory_store: bool,

    /// Team allowed to submit when using the memory store (repeatable)
    #[arg(long = "team")]
    teams: Vec<TeamId>,

    /// Do not start dispatching builds until POST /api/v2/start
    #[arg(long)]
    paused: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        load_builder_config(&args.config)?
    } else {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
        BuilderConfig::default()
    };
    config.validate()?;

    let engine: Arc<dyn ContainerEngine> = Arc::new(match &config.docker.host {
        Some(host) => DockerEngine::connect_http(host, config.docker.port, config.docker.timeout_secs)?,
        None => DockerEngine::new()?,
    });
    info!(engine = engine.name(), "Container engine ready");
    let mut registry =
        RegistryClient::new(config.registry.scheme.clone(), config.registry.address())?;
    if let Some((user, password)) = config.registry.credentials() {
        info!(user, "Using registry credentials");
        registry = registry.with_credentials(user, password);
    }
    let registry = Arc::new(registry);

    let store: Arc<dyn SubmissionStore> = if args.memory_store {
        info!(teams = args.teams.len(), "Using in-memory submission store");
        Arc::new(MemorySubmissionStore::with_teams(args.teams.iter().copied()))
    } else {
        let database_url = args
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--database-url or DATABASE_URL is required"))?;
        info!("Connecting to database...");
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        info!("Database connected");
        Arc::new(PgSubmissionStore::new(pool))
    };

    std::fs::create_dir_all(&config.output_dir)?;

    let scheduler = Arc::new(Scheduler::new(&config, engine, registry, store));
    if !args.paused {
        scheduler.start().await;
    }

    let state = AppState::new(scheduler.clone(), config);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", args.listen);
    let listener = TcpListener::bind(args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    scheduler.drain().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

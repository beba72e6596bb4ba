use color_eyre::eyre;
use dockyard_gateway::{create_app, AppState};
use dockyard_orchestrator::{BlockingBridge, Orchestrator};
use dockyard_runtime::DockerRuntime;
use dockyard_store::{SqliteStore, StatusStore};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
use config::DockyardConfig;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting dockyard...");
    let config = DockyardConfig::from_env()?;
    info!(?config, "Configuration loaded");

    // The store must be reachable before anything is accepted
    let sqlite = SqliteStore::connect(&config.database_url).await?;
    let store: Arc<dyn StatusStore> = Arc::new(sqlite.clone());

    let runtime = DockerRuntime::connect(&config.images_dir, config.docker_timeout, Handle::current())?;
    if let Err(e) = runtime.ping().await {
        warn!(error = %e, "Docker engine not reachable, builds will fail until it is");
    }

    let bridge = BlockingBridge::new(config.bridge_config());
    let orchestrator = Orchestrator::new(store.clone(), Arc::new(runtime), bridge);

    let app = create_app(AppState {
        store,
        orchestrator: orchestrator.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "Dockyard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining background tasks...");
    orchestrator.shutdown().await;
    sqlite.close().await;
    info!("Dockyard stopped.");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

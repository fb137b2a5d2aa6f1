use std::{sync::Arc, time::Duration};

use dynrender_control::{
    api, config::ControlConfig, logging, settings_file, state::AppState, users::KnownUsers,
};
use dynrender_engine::{PanelClient, RenderEngine, WsConnector};
use dynrender_store::{DbStore, MemoryStore, SettingsStore};
use sea_orm_migration::MigratorTrait;

const PANEL_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

async fn init_store(config: &ControlConfig) -> anyhow::Result<Arc<dyn SettingsStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL is not set; settings and the render queue will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let store = DbStore::connect(database_url).await?;
    dynrender_migration::Migrator::up(store.connection(), None).await?;
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControlConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    let store = init_store(&config).await?;
    tracing::info!(backend = store.backend(), "settings store ready");

    if let Some(path) = &config.settings_file {
        let written = settings_file::seed_from_file(store.as_ref(), path).await?;
        tracing::info!(path = %path.display(), keys = ?written, "seeded settings from file");
    }

    let http = reqwest::Client::builder()
        .timeout(PANEL_HTTP_TIMEOUT)
        .build()?;
    let users = Arc::new(KnownUsers::new());
    let engine = RenderEngine::new(
        store,
        Arc::new(PanelClient::new(http)),
        Arc::new(WsConnector),
        users.clone(),
    );

    // Entries left by a previous process have no task driving them and would block the head forever.
    let stale = engine.queue().clear().await?;
    if stale > 0 {
        tracing::warn!(stale, "dropped render queue entries left by a previous run");
    }

    if config.api_token.is_none() {
        tracing::warn!("DYNRENDER_API_TOKEN is not set; the API is unauthenticated");
    }
    let state = AppState::new(engine, users, config.api_token.clone());
    let app = api::router(state.clone());

    tracing::info!(addr = %config.listen, "dynrender-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown(config.shutdown_grace).await;
    tracing::info!("dynrender-control stopped");
    Ok(())
}

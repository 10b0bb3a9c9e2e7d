use std::{collections::HashMap, sync::Arc};

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use server::{
    api,
    config::Config,
    state::AppState,
    store::{self, SqliteStore},
    worker::{WorkerKind, WorkerPool},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(port = config.port, "server starting");

    // Database
    let pool = store::connect(&config.database_url).await?;
    let store = SqliteStore::new(pool);
    store
        .migrate()
        .await
        .map_err(|e| anyhow::anyhow!("store migration failed: {e}"))?;

    // Upload staging directory
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // The kind-to-command map is fixed here and never mutated.
    let workers = WorkerPool::new(
        HashMap::from([
            (WorkerKind::Chat, config.chat_worker.clone()),
            (WorkerKind::Ingest, config.ingest_worker.clone()),
        ]),
        config.worker_max_concurrency,
        config.worker_queue_capacity,
        config.worker_timeout,
        config.worker_queue_wait,
    );

    let state = Arc::new(AppState {
        store,
        workers,
        upload_dir: config.upload_dir.clone(),
    });

    // The browser client is served from another origin.
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

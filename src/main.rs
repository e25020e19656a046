//! Arena Back binary entrypoint wiring the WebSocket API, task workers and fan-out listener.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_back::{
    config::AppConfig,
    dao::{
        broker::{Broker, MemoryBroker},
        durable_store::{DurableStore, MemoryDurableStore},
    },
    routes,
    services::{fanout, worker},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = build_store().await?;
    let broker = build_broker().await?;
    let app_state = AppState::new(config, store, broker);

    let mut background = vec![
        tokio::spawn(worker::run_worker(
            app_state.clone(),
            app_state.db_queue().clone(),
        )),
        tokio::spawn(worker::run_worker(
            app_state.clone(),
            app_state.game_queue().clone(),
        )),
        tokio::spawn(worker::run_retry_sweep(
            app_state.clone(),
            vec![app_state.db_queue().clone(), app_state.game_queue().clone()],
        )),
    ];
    background.push(tokio::spawn(fanout::run_global_listener(app_state.clone())));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, node_id = %app_state.node_id(), "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    let served = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum");

    app_state.trigger_shutdown();
    for handle in background {
        if let Err(err) = handle.await {
            warn!(error = %err, "background task ended abnormally");
        }
    }

    served
}

/// Pick the durable store from `ARENA_STORE` (`mongo` or `memory`).
async fn build_store() -> anyhow::Result<Arc<dyn DurableStore>> {
    let kind = env::var("ARENA_STORE").unwrap_or_else(|_| default_store().into());
    match kind.as_str() {
        "memory" => {
            warn!("using the in-memory store; balances are lost on restart");
            Ok(Arc::new(MemoryDurableStore::new()))
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use arena_back::dao::durable_store::mongodb::{MongoConfig, MongoDurableStore};

            let config = MongoConfig::from_env()
                .await
                .context("parsing MONGO_URI")?;
            let store = MongoDurableStore::connect(config)
                .await
                .context("connecting to MongoDB")?;
            info!("connected to MongoDB");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unsupported ARENA_STORE `{other}`"),
    }
}

/// Pick the broker from `ARENA_BROKER` (`redis` or `memory`).
async fn build_broker() -> anyhow::Result<Arc<dyn Broker>> {
    let kind = env::var("ARENA_BROKER").unwrap_or_else(|_| default_broker().into());
    match kind.as_str() {
        "memory" => {
            warn!("using the in-memory broker; fan-out stays inside this process");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "redis-broker")]
        "redis" => {
            use arena_back::dao::broker::redis::RedisBroker;

            let url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
            let broker = RedisBroker::connect(&url)
                .await
                .context("connecting to Redis")?;
            info!("connected to Redis");
            Ok(Arc::new(broker))
        }
        other => anyhow::bail!("unsupported ARENA_BROKER `{other}`"),
    }
}

fn default_store() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    }
}

fn default_broker() -> &'static str {
    if cfg!(feature = "redis-broker") {
        "redis"
    } else {
        "memory"
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

mod config;
mod db;
mod error;
mod frame;
mod rate_limit;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().expect("invalid configuration");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, nothing will be persisted");
            match &config.store_seed_file {
                Some(path) => Arc::new(MemoryStore::from_seed_file(path).expect("store seed failed")),
                None => Arc::new(MemoryStore::new()),
            }
        }
    };

    let verifier = Arc::new(services::auth::JwtVerifier::new(&config.jwt_secret));
    let state = state::AppState::new(store, verifier, &config);

    let app = routes::app(state, &config.allowed_origins);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "roomcast listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

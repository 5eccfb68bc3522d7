mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;
mod services;
mod store;

use std::sync::Arc;

use crate::{
    config::Config,
    models::AppState,
    services::{
        appointment::AppointmentService,
        audit::{AuditTrail, PgAuditTrail},
        ledger::{BlockchainService, DigestLedger, HttpLedger},
        notifier::PgNotifier,
    },
    store::postgres::PgAppointmentStore,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    let ledger: Arc<dyn BlockchainService> = match &cfg.blockchain_endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "using remote appointment ledger");
            Arc::new(HttpLedger::new(endpoint.as_str()))
        }
        None => {
            tracing::info!("BLOCKCHAIN_ENDPOINT not set, using local digest ledger");
            Arc::new(DigestLedger)
        }
    };
    let audit: Arc<dyn AuditTrail> = Arc::new(PgAuditTrail::new(pool.clone()));

    let appointments = AppointmentService::new(
        Arc::new(PgAppointmentStore::new(pool.clone())),
        ledger,
        Arc::new(PgNotifier::new(pool.clone())),
        audit.clone(),
        cfg.prevent_double_booking,
    );

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        refresh_ttl_hours: cfg.refresh_ttl_hours,
        appointments,
        audit,
    };

    // browser clients need the OPTIONS preflight answered for Authorization headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

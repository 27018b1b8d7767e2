// donation_app/src/main.rs

mod config;
mod db;
mod errors;
mod models;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::db::SqliteStore;
use crate::errors::AppError;
use crate::services::{GeoProvider, HttpConversionSender, RotatingCountryLookup};
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use conversion_relay::{ConversionStore, CountryLookup, Orchestrator, RetrySweeper};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

fn startup_error(stage: &str, e: AppError) -> std::io::Error {
  tracing::error!(error = %e, "{} failed.", stage);
  std::io::Error::other(format!("{}: {}", stage, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  tracing_subscriber::fmt()
    .with_max_level(Level::INFO)
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG override
    .with_span_events(FmtSpan::CLOSE)
    .init();

  tracing::info!("Starting donation server...");

  let app_config = Arc::new(AppConfig::from_env().map_err(|e| startup_error("Configuration", e))?);

  let db_pool = db::connect(&app_config.database_url)
    .await
    .map_err(|e| startup_error("Database connection", e))?;
  db::migrate(&db_pool)
    .await
    .map_err(|e| startup_error("Database migration", e))?;
  tracing::info!("Database ready.");

  let http_client = reqwest::Client::builder()
    .timeout(app_config.http_timeout)
    .build()
    .map_err(|e| startup_error("HTTP client", AppError::Internal(e.to_string())))?;

  let lookup: Option<Arc<dyn CountryLookup>> = if app_config.geo_lookup_enabled {
    Some(Arc::new(RotatingCountryLookup::new(http_client.clone(), GeoProvider::defaults())))
  } else {
    None
  };
  let sender = Arc::new(HttpConversionSender::new(
    http_client,
    app_config.conversion_api_url.clone(),
    app_config.conversion_api_token.clone(),
    app_config.order_complete_url(),
    lookup,
  ));

  let store: Arc<dyn ConversionStore> = Arc::new(SqliteStore::new(db_pool));
  let policy = app_config.retry_policy();
  let orchestrator = Arc::new(Orchestrator::new(store.clone(), sender, policy));
  let sweeper = Arc::new(RetrySweeper::new(store.clone(), orchestrator.clone(), policy));
  let sweeper_handle = sweeper.clone().spawn(app_config.sweep_interval);

  let app_state = AppState {
    store,
    orchestrator,
    sweeper,
  };

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  let server_result = match HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)
  {
    Ok(server) => server.run().await,
    Err(e) => Err(e),
  };

  sweeper_handle.shutdown().await;
  tracing::info!("Donation server stopped.");
  server_result
}

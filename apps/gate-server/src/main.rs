//! # Bulwark Gate Server
//!
//! Actix-web sidecar that puts challenge, admission and spend checks in
//! front of a metered generation backend.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();

    tracing::info!(
        "Starting Bulwark gate server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await.map_err(std::io::Error::other)?;

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes(&state))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

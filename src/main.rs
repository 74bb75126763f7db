mod ai;
mod config;
mod dashboard;
mod errors;
mod handlers;
mod media;
mod models;
mod prompts;
mod snapshot;
mod state;
mod workflow;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::ai::{AiCapability, OpenAiCapability};
use crate::config::Settings;
use crate::handlers::AppState;
use crate::snapshot::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
use crate::state::SessionStore;

// ==============================================================================
// MAIN APPLICATION
// ==============================================================================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_web=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Farmsmart crop health dashboard");

    // Load configuration: layered files when present, plain environment otherwise
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Layered configuration unavailable, using environment");
            Settings::from_env().context("Failed to load configuration")?
        }
    };
    info!("Configuration loaded successfully");

    // Restore session state
    let backend: Arc<dyn SnapshotStore> = if settings.storage.data_dir.trim().is_empty() {
        warn!("No data directory configured, session state will not survive restarts");
        Arc::new(InMemorySnapshotStore::new())
    } else {
        Arc::new(
            FileSnapshotStore::open(&settings.storage.data_dir)
                .await
                .with_context(|| format!("Failed to open data directory {}", settings.storage.data_dir))?,
        )
    };
    let session = SessionStore::load(backend).await;

    // AI capability is optional; without it the analysis endpoints answer 502
    let ai: Option<Arc<dyn AiCapability>> = match OpenAiCapability::new(&settings) {
        Some(capability) => {
            info!(model = %settings.openai.model, "AI capability configured");
            Some(Arc::new(capability))
        }
        None => {
            warn!("OpenAI API key not configured, AI features disabled");
            None
        }
    };

    let app_state = web::Data::new(AppState::new(
        session,
        ai,
        settings.storage.max_image_bytes(),
    ));
    let shutdown_state = app_state.clone();
    let origins = settings.server.cors_allowed_origins.clone();
    // Base64 inflates uploads by a third; leave headroom for the JSON envelope
    let json_limit = settings.storage.max_image_bytes() * 4 / 3 + 64 * 1024;

    info!(
        "Starting HTTP server on {}:{}",
        settings.server.host, settings.server.port
    );

    let mut server = HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| {
                if origin == "*" {
                    cors.allow_any_origin()
                } else {
                    cors.allowed_origin(origin)
                }
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors)
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .configure(handlers::configure)
    });

    if let Some(workers) = settings.server.workers {
        server = server.workers(workers);
    }

    server
        .bind((settings.server.host.as_str(), settings.server.port))?
        .run()
        .await?;

    info!("Server stopped, writing final session snapshot");
    if let Err(e) = shutdown_state.session.read().await.save().await {
        warn!(error = %e, "Failed to write final session snapshot");
    }

    Ok(())
}

pub mod api;
pub mod automation;
pub mod config;
pub mod error;
pub mod models;
pub mod snapshot;
pub mod storage;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{AppState, SharedState};
use crate::automation::core::ChromeLauncher;
use crate::config::Settings;
use crate::error::{AutomationError, AutomationResult};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/login", post(api::login))
        .route("/check_new_tasks", get(api::check_new_tasks))
        .route("/check_task_messages", get(api::check_task_messages))
        .route("/add_technician", post(api::add_technician))
        .route("/api/workers", get(api::get_workers).post(api::add_worker))
        .route("/api/workers/:name", delete(api::delete_worker))
        .route("/api/form/:task_id", get(api::get_form))
        .route("/api/upload_media", post(api::upload_media))
        .route("/api/save-form-template", post(api::save_form_template))
        .route("/api/list-form-templates", get(api::list_form_templates))
        .route("/api/form-template/:filename", get(api::get_form_template))
        .route("/api/scheduler", get(api::scheduler_status))
        .route("/api/snapshots", delete(api::purge_snapshots))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until Ctrl-C, then stops the background sweep.
pub async fn run_server(settings: Settings) -> AutomationResult<()> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let sessions = Arc::new(ChromeLauncher::new(&settings));
    let state = Arc::new(AppState::new(settings, sessions, shutdown_tx.clone()));

    match state.roster.load() {
        Ok(accounts) if !accounts.is_empty() => state.start_background(),
        Ok(_) => info!("Roster empty, background scraping starts on first login"),
        Err(e) => warn!(error = %e, "Roster unreadable at startup"),
    }

    let bind = state.settings.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| AutomationError::Config(format!("could not bind {}: {}", bind, e)))?;
    info!(addr = %bind, data_dir = %state.settings.data_dir.display(), "Serving FMS bridge");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            let _ = shutdown_tx.send(());
        })
        .await?;
    Ok(())
}

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

pub mod events;
pub mod handlers;
pub mod state;

use self::state::AppState;
use handlers::{
    create_entry, delete_entry, get_day, get_entry, get_image, get_map, get_profile, get_stats,
    journal_events_stream, list_days, list_entries, toggle_favorite, update_profile,
};

// Photos straight off a phone camera routinely exceed axum's 2 MB default
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/entries", get(list_entries).post(create_entry))
        .route("/api/entries/:id", get(get_entry).delete(delete_entry))
        .route("/api/entries/:id/favorite", post(toggle_favorite))
        .route("/api/images/:id", get(get_image))
        .route("/api/days", get(list_days))
        .route("/api/days/:date", get(get_day))
        .route("/api/map", get(get_map))
        .route("/api/stats", get(get_stats))
        .route("/api/profile", get(get_profile).put(update_profile))
        .route("/api/events", get(journal_events_stream))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

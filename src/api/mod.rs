mod error;
mod handlers;

use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, get_service, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    errors::{AppError, Result},
    orchestrator::VideoOrchestrator,
    util::ArtifactStore,
};

/// Room for multipart boundaries and the text fields next to the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<VideoOrchestrator>,
    pub store: Arc<ArtifactStore>,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState, public_dir: &Path) -> Router {
    // Request paths `/videos/<f>` and `/audio/<f>` map onto the storage root.
    let artifacts = ServeDir::new(state.store.root());
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/generate-video", post(handlers::generate_video))
        .route(
            "/generate-video-from-image",
            post(handlers::generate_video_from_image),
        )
        .route("/extract-text", post(handlers::extract_text))
        .route("/generate-code", post(handlers::generate_code))
        .route("/videos-list", get(handlers::list_videos))
        .route(
            "/videos/{filename}",
            get_service(artifacts.clone()).delete(handlers::delete_video),
        )
        .route("/audio/{filename}", get_service(artifacts))
        .fallback_service(ServeDir::new(public_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(addr: SocketAddr, state: AppState, public_dir: &Path) -> Result<()> {
    let app = router(state, public_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "api", %addr, "HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::other(format!("HTTP server error: {err}")))?;

    Ok(())
}

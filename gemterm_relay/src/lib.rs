use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{config::RelayConfig, provider::TextStreamProvider, tower_ext::NoCacheServiceExt};

pub mod chat;
pub mod config;
pub mod gemini;
pub mod logging;
pub mod provider;
mod tower_ext;

pub struct AppState {
    pub config: RelayConfig,
    pub provider: Arc<dyn TextStreamProvider>,
}

impl AppState {
    pub fn new(config: RelayConfig, provider: Arc<dyn TextStreamProvider>) -> Self {
        Self { config, provider }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir).no_cache();

    Router::new()
        .route("/api/chat", post(chat::chat_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

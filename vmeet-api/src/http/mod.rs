//! HTTP surface: join-token issuance, health, and the WebSocket upgrade.

pub mod error;
pub mod health;
pub mod join;

pub use error::{AppError, AppResult};

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vmeet_core::config::Config;
use vmeet_core::directory::RoomDirectory;
use vmeet_core::token::TokenStore;
use vmeet_sfu::recording::RecordingMedia;
use vmeet_sfu::transport::TransportFactory;
use vmeet_sfu::upload::RecordingScheduler;
use vmeet_sfu::RoomManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<RoomManager>,
    pub directory: Arc<dyn RoomDirectory>,
    pub tokens: Arc<TokenStore>,
    pub transport: Arc<TransportFactory>,
    pub media: Arc<dyn RecordingMedia>,
    pub scheduler: Arc<RecordingScheduler>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/rooms/{room_id}/join", post(join::issue_join_token))
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> (AppState, Arc<vmeet_core::directory::MemoryDirectory>) {
    use vmeet_core::directory::{MemoryDirectory, NullPollReview, PollReview};
    use vmeet_core::storage::{MediaStore, MemoryMediaStore};
    use vmeet_sfu::recording::FileRecordingMedia;

    let config = Arc::new(Config::default());
    let directory = Arc::new(MemoryDirectory::new());
    let review = Arc::new(NullPollReview::new());
    let manager = Arc::new(RoomManager::new(
        Arc::clone(&directory) as Arc<dyn RoomDirectory>,
        review as Arc<dyn PollReview>,
    ));
    let store = Arc::new(MemoryMediaStore::new());
    let spool = std::env::temp_dir().join("vmeet-test-spool");
    let state = AppState {
        config: Arc::clone(&config),
        manager,
        directory: Arc::clone(&directory) as Arc<dyn RoomDirectory>,
        tokens: Arc::new(TokenStore::new(config.tokens.ttl_hours)),
        transport: Arc::new(TransportFactory::new(&config.webrtc).expect("factory")),
        media: Arc::new(FileRecordingMedia::new(spool, &config.recording))
            as Arc<dyn RecordingMedia>,
        scheduler: Arc::new(RecordingScheduler::new(store as Arc<dyn MediaStore>)),
    };
    (state, directory)
}

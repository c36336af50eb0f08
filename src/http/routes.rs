use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session queries
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:session_key/status", get(handlers::get_session_status))
        .route("/sessions/:session_key/voice", get(handlers::get_voice_states))
        // Playback control
        .route("/sessions/:session_key/play", post(handlers::play))
        .route("/sessions/:session_key/pause", post(handlers::pause))
        .route("/sessions/:session_key/resume", post(handlers::resume))
        .route("/sessions/:session_key/stop", post(handlers::stop))
        .route("/sessions/:session_key/reset", post(handlers::stop))
        // Recording
        .route(
            "/sessions/:session_key/record",
            post(handlers::start_recording),
        )
        .route(
            "/sessions/:session_key/recording",
            get(handlers::get_recording),
        )
        .route("/sessions/:session_key/leave", post(handlers::leave))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

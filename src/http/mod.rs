//! HTTP API for controlling voice sessions
//!
//! - GET /health - Health check
//! - GET /sessions - Known session keys
//! - GET /sessions/:key/status - Session status
//! - GET /sessions/:key/voice - Users in voice for the key
//! - POST /sessions/:key/play - Play a file to a user's channel
//! - POST /sessions/:key/pause | resume | stop | reset - Player control
//! - POST /sessions/:key/record - Record a channel per speaker
//! - GET /sessions/:key/recording - Recording progress and last summary
//! - POST /sessions/:key/leave - Leave voice

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

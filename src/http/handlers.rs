use super::state::AppState;
use crate::recording::{save_channel_audio, RecordingSummary};
use crate::transport::{leave_voice, users_in_voice_channels};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    /// User whose current voice channel receives the audio
    pub user_id: String,

    /// Local audio file to play
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    /// Voice channel to record
    pub channel_id: String,

    /// Silence before a speaker's audio is written (default from config)
    pub silence_threshold_ms: Option<u64>,

    /// Output directory (default from config)
    pub output_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub session_key: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RecordingResponse {
    pub session_key: String,
    pub recording: bool,
    pub last: Option<RecordingSummary>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn action_response(status: StatusCode, session_key: String, state: &str, message: String) -> Response {
    (
        status,
        Json(ActionResponse {
            session_key,
            status: state.to_string(),
            message,
        }),
    )
        .into_response()
}

fn session_not_found(session_key: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_key),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /sessions
/// Known session keys
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut keys = state.controller.registry().keys().await;
    keys.sort();
    (StatusCode::OK, Json(keys))
}

/// GET /sessions/:session_key/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.controller.registry().get(&session_key).await {
        Some(session) => (StatusCode::OK, Json(session.status())).into_response(),
        None => session_not_found(&session_key),
    }
}

/// GET /sessions/:session_key/voice
/// Users currently in voice under this session key
pub async fn get_voice_states(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    let transport = Arc::clone(state.controller.transport());
    match users_in_voice_channels(transport.as_ref(), &session_key).await {
        Ok(states) => (StatusCode::OK, Json(states)).into_response(),
        Err(e) => {
            error!("Failed to get voice states: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get voice states: {:#}", e),
            )
        }
    }
}

/// POST /sessions/:session_key/play
/// Start playback in the background; the request returns once accepted
pub async fn play(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<PlayRequest>,
) -> Response {
    let path = PathBuf::from(&req.path);
    if !path.is_file() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Audio file {} not found", req.path),
        );
    }

    info!(
        "Queueing playback of {} for user {} in session {}",
        req.path, req.user_id, session_key
    );

    let controller = Arc::clone(&state.controller);
    let key = session_key.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.play(&key, &req.user_id, &path).await {
            debug!("Background playback for {} ended with error: {:#}", key, e);
        }
    });

    action_response(
        StatusCode::ACCEPTED,
        session_key,
        "accepted",
        "Playback queued".to_string(),
    )
}

/// POST /sessions/:session_key/pause
pub async fn pause(State(state): State<AppState>, Path(session_key): Path<String>) -> Response {
    if state.controller.pause(&session_key).await {
        action_response(
            StatusCode::OK,
            session_key,
            "paused",
            "Playback paused".to_string(),
        )
    } else {
        session_not_found(&session_key)
    }
}

/// POST /sessions/:session_key/resume
pub async fn resume(State(state): State<AppState>, Path(session_key): Path<String>) -> Response {
    if state.controller.resume(&session_key).await {
        action_response(
            StatusCode::OK,
            session_key,
            "playing",
            "Playback resumed".to_string(),
        )
    } else {
        session_not_found(&session_key)
    }
}

/// POST /sessions/:session_key/stop and /sessions/:session_key/reset
/// Stop any playback; the session gets a fresh Player
pub async fn stop(State(state): State<AppState>, Path(session_key): Path<String>) -> Response {
    if state.controller.stop(&session_key).await {
        action_response(
            StatusCode::OK,
            session_key,
            "stopped",
            "Session reset".to_string(),
        )
    } else {
        session_not_found(&session_key)
    }
}

/// POST /sessions/:session_key/record
/// Start recording a voice channel in the background
pub async fn start_recording(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(req): Json<RecordRequest>,
) -> Response {
    {
        let mut active = state.active_recordings.write().await;
        if !active.insert(session_key.clone()) {
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} is already recording", session_key),
            );
        }
    }

    let options = state.recording.options(
        req.output_dir.map(PathBuf::from),
        req.silence_threshold_ms.map(Duration::from_millis),
    );

    info!(
        "Starting recording of channel {} for session {}",
        req.channel_id, session_key
    );

    let task_state = state.clone();
    let key = session_key.clone();
    tokio::spawn(async move {
        let transport = Arc::clone(task_state.controller.transport());
        let result = save_channel_audio(
            transport.as_ref(),
            Arc::clone(&task_state.codec),
            &key,
            &req.channel_id,
            options,
        )
        .await;

        match result {
            Ok(summary) => {
                info!(
                    "Recording for {} saved {} files",
                    key,
                    summary.total_flushes
                );
                task_state.recordings.write().await.insert(key.clone(), summary);
            }
            Err(e) => error!("Recording for {} failed: {:#}", key, e),
        }

        task_state.active_recordings.write().await.remove(&key);
    });

    action_response(
        StatusCode::ACCEPTED,
        session_key,
        "recording",
        "Recording started".to_string(),
    )
}

/// GET /sessions/:session_key/recording
/// Whether a recording is running, plus the last finished one
pub async fn get_recording(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Response {
    let recording = state.active_recordings.read().await.contains(&session_key);
    let last = state.recordings.read().await.get(&session_key).cloned();

    if !recording && last.is_none() {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No recording for session {}", session_key),
        );
    }

    (
        StatusCode::OK,
        Json(RecordingResponse {
            session_key,
            recording,
            last,
        }),
    )
        .into_response()
}

/// POST /sessions/:session_key/leave
/// Leave voice; a running recording ends once its packet stream closes
pub async fn leave(State(state): State<AppState>, Path(session_key): Path<String>) -> Response {
    let transport = Arc::clone(state.controller.transport());
    match leave_voice(transport.as_ref(), &session_key).await {
        Ok(()) => action_response(
            StatusCode::OK,
            session_key,
            "left",
            "Left voice channel".to_string(),
        ),
        Err(e) => {
            error!("Failed to leave voice: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to leave voice: {:#}", e),
            )
        }
    }
}

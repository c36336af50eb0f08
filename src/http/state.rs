use crate::audio::Codec;
use crate::config::RecordingConfig;
use crate::playback::PlaybackController;
use crate::recording::RecordingSummary;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Playback for every session key
    pub controller: Arc<PlaybackController>,

    /// Codec used to decode inbound audio for recordings
    pub codec: Arc<dyn Codec>,

    /// Defaults for recordings started over HTTP
    pub recording: Arc<RecordingConfig>,

    /// Session keys with a recording in progress
    pub active_recordings: Arc<RwLock<HashSet<String>>>,

    /// Last finished recording per session key
    pub recordings: Arc<RwLock<HashMap<String, RecordingSummary>>>,
}

impl AppState {
    pub fn new(
        controller: Arc<PlaybackController>,
        codec: Arc<dyn Codec>,
        recording: RecordingConfig,
    ) -> Self {
        Self {
            controller,
            codec,
            recording: Arc::new(recording),
            active_recordings: Arc::new(RwLock::new(HashSet::new())),
            recordings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

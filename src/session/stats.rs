use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::player::PlayerState;

/// Point-in-time view of a Session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session key (e.g. guild id)
    pub session_key: String,

    /// Identity of the current Player control block
    pub player_id: Uuid,

    /// Current Player state
    pub player_state: PlayerState,

    /// Whether a playback is running
    pub is_playing: bool,

    /// Whether the idle-disconnect watchdog is armed
    pub watchdog_active: bool,

    /// When the last playback finished
    pub last_played_at: Option<DateTime<Utc>>,

    /// Seconds since the last playback finished
    pub idle_secs: Option<f64>,

    /// When the Session was created
    pub created_at: DateTime<Utc>,
}

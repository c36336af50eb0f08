use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::SessionConfig;
use super::player::{Player, PlayerState};
use super::stats::SessionStatus;
use super::watchdog::DisconnectWatchdog;
use crate::transport::VoiceTransport;

#[derive(Debug, Default)]
struct PlaybackStatus {
    /// When the last playback finished
    last_played: Option<Instant>,
    last_played_at: Option<DateTime<Utc>>,
    is_playing: bool,
    /// Armed by each playback, cleared by the watchdog or a reset
    watchdog_active: bool,
}

/// Per-tenant voice state: the Player, playback status and watchdog
pub struct Session {
    key: String,
    created_at: DateTime<Utc>,
    /// Serializes playbacks on this Session
    playback_lock: tokio::sync::Mutex<()>,
    player: Mutex<Arc<Player>>,
    status: Mutex<PlaybackStatus>,
    watchdog: Mutex<Option<DisconnectWatchdog>>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created_at: Utc::now(),
            playback_lock: tokio::sync::Mutex::new(()),
            player: Mutex::new(Arc::new(Player::new())),
            status: Mutex::new(PlaybackStatus::default()),
            watchdog: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn status_lock(&self) -> MutexGuard<'_, PlaybackStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn player_lock(&self) -> MutexGuard<'_, Arc<Player>> {
        self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current Player control block
    pub fn player(&self) -> Arc<Player> {
        Arc::clone(&self.player_lock())
    }

    pub fn is_playing(&self) -> bool {
        self.status_lock().is_playing
    }

    pub fn watchdog_active(&self) -> bool {
        self.status_lock().watchdog_active
    }

    /// When the last playback finished
    pub fn last_played(&self) -> Option<Instant> {
        self.status_lock().last_played
    }

    /// Wait for exclusive playback rights on this Session
    pub async fn lock_playback(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.playback_lock.lock().await
    }

    /// Stop the current Player, install a fresh one and clear playback flags
    pub(crate) fn reset(&self) {
        let old = {
            let mut player = self.player_lock();
            std::mem::replace(&mut *player, Arc::new(Player::new()))
        };
        old.stop();

        let mut status = self.status_lock();
        status.is_playing = false;
        status.watchdog_active = false;

        info!("Session {} reset (stopped player {})", self.key, old.id());
    }

    /// Player to drive the next playback.
    ///
    /// A stopped Player is never reused; a paused one is resumed so every
    /// playback starts audible.
    pub(crate) fn player_for_playback(&self) -> Arc<Player> {
        let mut player = self.player_lock();
        match player.state() {
            PlayerState::Stopping => {
                debug!("Session {} replacing stopped player", self.key);
                *player = Arc::new(Player::new());
            }
            PlayerState::Paused => player.resume(),
            PlayerState::Playing => {}
        }
        Arc::clone(&player)
    }

    /// Mark playback as running until the returned guard is finished or dropped
    pub fn begin_playback(self: &Arc<Self>) -> PlaybackGuard {
        {
            let mut status = self.status_lock();
            status.is_playing = true;
            status.watchdog_active = true;
        }
        PlaybackGuard {
            session: Arc::clone(self),
        }
    }

    fn finish_playback(&self) {
        let mut status = self.status_lock();
        status.is_playing = false;
        status.last_played = Some(Instant::now());
        status.last_played_at = Some(Utc::now());
    }

    /// Disarm and report whether the idle-disconnect condition holds
    pub(crate) fn take_idle_disconnect(&self, timeout: Duration) -> bool {
        let mut status = self.status_lock();
        let idle_long_enough = status
            .last_played
            .map_or(true, |last| last.elapsed() > timeout);

        if idle_long_enough && !status.is_playing && status.watchdog_active {
            status.watchdog_active = false;
            return true;
        }
        false
    }

    /// Start the disconnect watchdog unless one is already running
    pub fn ensure_watchdog(self: &Arc<Self>, transport: Arc<dyn VoiceTransport>, config: &SessionConfig) {
        let mut watchdog = self.watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        if watchdog.as_ref().map_or(false, |w| !w.is_finished()) {
            return;
        }
        *watchdog = Some(DisconnectWatchdog::spawn(
            Arc::downgrade(self),
            transport,
            config.disconnect_timeout,
            config.watchdog_interval,
        ));
    }

    /// Stop the watchdog task, if any
    pub fn stop_watchdog(&self) {
        if let Some(watchdog) = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watchdog.stop();
        }
    }

    pub fn status(&self) -> SessionStatus {
        let player = self.player();
        let status = self.status_lock();
        SessionStatus {
            session_key: self.key.clone(),
            player_id: player.id(),
            player_state: player.state(),
            is_playing: status.is_playing,
            watchdog_active: status.watchdog_active,
            last_played_at: status.last_played_at,
            idle_secs: status.last_played.map(|t| t.elapsed().as_secs_f64()),
            created_at: self.created_at,
        }
    }
}

/// Scoped playback marker.
///
/// `finish` waits the settle delay before recording completion; if the
/// playback future is dropped instead, completion is recorded immediately.
pub struct PlaybackGuard {
    session: Arc<Session>,
}

impl PlaybackGuard {
    pub async fn finish(self, settle_delay: Duration) {
        tokio::time::sleep(settle_delay).await;
    }
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.session.finish_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_records_completion() {
        let session = Arc::new(Session::new("guild-1"));
        assert!(session.last_played().is_none());

        let guard = session.begin_playback();
        assert!(session.is_playing());
        assert!(session.watchdog_active());

        guard.finish(Duration::ZERO).await;
        assert!(!session.is_playing());
        assert!(session.watchdog_active());
        assert!(session.last_played().is_some());
    }

    #[tokio::test]
    async fn test_dropped_guard_still_clears_playing() {
        let session = Arc::new(Session::new("guild-1"));
        {
            let _guard = session.begin_playback();
        }
        assert!(!session.is_playing());
    }

    #[test]
    fn test_stopped_player_is_replaced_for_next_playback() {
        let session = Session::new("guild-1");
        let first = session.player();
        first.stop();

        let next = session.player_for_playback();
        assert_ne!(first.id(), next.id());
        assert_eq!(next.state(), PlayerState::Playing);
    }

    #[test]
    fn test_paused_player_is_resumed_for_next_playback() {
        let session = Session::new("guild-1");
        session.player().pause();

        let next = session.player_for_playback();
        assert_eq!(next.state(), PlayerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_disconnect_fires_once() {
        let session = Arc::new(Session::new("guild-1"));
        session.begin_playback().finish(Duration::ZERO).await;

        let timeout = Duration::from_secs(10);
        assert!(!session.take_idle_disconnect(timeout));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(session.take_idle_disconnect(timeout));
        assert!(!session.take_idle_disconnect(timeout));
    }
}

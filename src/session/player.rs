use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Control state of a Player. `Stopping` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Playing,
    Paused,
    Stopping,
}

/// Playback control block for one Session.
///
/// Pause/resume/stop are written to a single watched state; the playback
/// loop and the Encode/Send stage observe the latest value at their next
/// suspension point or frame.
#[derive(Debug)]
pub struct Player {
    id: Uuid,
    state: watch::Sender<PlayerState>,
}

impl Player {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PlayerState::Playing);
        Self {
            id: Uuid::new_v4(),
            state,
        }
    }

    /// Identity of this control block; a reset always yields a new id
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PlayerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state.subscribe()
    }

    pub fn pause(&self) {
        self.transition(PlayerState::Playing, PlayerState::Paused);
    }

    pub fn resume(&self) {
        self.transition(PlayerState::Paused, PlayerState::Playing);
    }

    pub fn stop(&self) {
        self.state.send_if_modified(|state| {
            let changed = *state != PlayerState::Stopping;
            *state = PlayerState::Stopping;
            changed
        });
    }

    fn transition(&self, from: PlayerState, to: PlayerState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_signal_wins() {
        let player = Player::new();
        player.pause();
        player.resume();
        player.pause();
        assert_eq!(player.state(), PlayerState::Paused);
        player.resume();
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_stop_is_terminal() {
        let player = Player::new();
        player.stop();
        player.resume();
        player.pause();
        assert_eq!(player.state(), PlayerState::Stopping);
    }

    #[tokio::test]
    async fn test_subscriber_observes_stop() {
        let player = Player::new();
        let mut rx = player.subscribe();
        player.stop();
        rx.wait_for(|s| *s == PlayerState::Stopping).await.unwrap();
    }

    #[test]
    fn test_new_players_are_distinct() {
        assert_ne!(Player::new().id(), Player::new().id());
    }
}

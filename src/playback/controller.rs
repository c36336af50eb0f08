use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sender::{send_pcm, SenderStats};
use crate::audio::{Codec, DecodeProcess};
use crate::session::{Player, PlayerState, Session, SessionConfig, SessionRegistry};
use crate::transport::{leave_voice, VoiceConnection, VoiceTransport};

/// Drives outbound playback for every Session in a registry
pub struct PlaybackController {
    registry: SessionRegistry,
    transport: Arc<dyn VoiceTransport>,
    codec: Arc<dyn Codec>,
    config: SessionConfig,
}

impl PlaybackController {
    pub fn new(
        registry: SessionRegistry,
        transport: Arc<dyn VoiceTransport>,
        codec: Arc<dyn Codec>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            codec,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Join the user's voice channel and play a file to it.
    ///
    /// Playbacks on the same session key run one at a time; a second call
    /// waits until the first finishes or is stopped.
    pub async fn play(&self, session_key: &str, user_id: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let session = self.registry.get_or_create(session_key).await;
        let _playback_lock = session.lock_playback().await;

        let connection = self.join_with_retry(session_key, user_id).await?;
        let player = session.player_for_playback();

        let monitor = CancellationToken::new();
        let _monitor_guard = monitor.clone().drop_guard();
        self.spawn_connection_monitor(&session, &connection, player.id(), monitor);
        session.ensure_watchdog(Arc::clone(&self.transport), &self.config);

        if let Err(e) = connection.set_speaking(true).await {
            if let Err(leave_err) = leave_voice(self.transport.as_ref(), session_key).await {
                return Err(anyhow!(
                    "error setting speaking state: {:#}, and error leaving voice: {:#}",
                    e,
                    leave_err
                ));
            }
            return Err(e.context("error setting speaking state"));
        }

        info!("Playing {} to session {}", path.display(), session_key);

        let guard = session.begin_playback();

        let result = match self.play_file(Arc::clone(&connection), &player, path).await {
            Ok(()) => connection
                .set_speaking(false)
                .await
                .context("error setting speaking state to false"),
            Err(e) => Err(e.context("error playing audio file")),
        };

        guard.finish(self.config.settle_delay).await;

        match &result {
            Ok(()) => info!("Playback finished for session {}", session_key),
            Err(e) => error!("Playback failed for session {}: {:#}", session_key, e),
        }

        result
    }

    /// Pause the session's current Player. Returns false for unknown keys.
    pub async fn pause(&self, session_key: &str) -> bool {
        match self.registry.get(session_key).await {
            Some(session) => {
                session.player().pause();
                true
            }
            None => false,
        }
    }

    /// Resume the session's current Player. Returns false for unknown keys.
    pub async fn resume(&self, session_key: &str) -> bool {
        match self.registry.get(session_key).await {
            Some(session) => {
                session.player().resume();
                true
            }
            None => false,
        }
    }

    /// Stop any running playback; the session gets a fresh Player
    pub async fn stop(&self, session_key: &str) -> bool {
        self.registry.reset(session_key).await
    }

    async fn join_with_retry(
        &self,
        session_key: &str,
        user_id: &str,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let max_tries = self.config.join_attempts.max(1);
        let mut tries = 0;

        loop {
            let channel_id = self
                .transport
                .find_user_voice_channel(user_id)
                .await
                .context("error finding user voice channel")?;

            tokio::time::sleep(self.config.join_delay).await;
            tries += 1;

            match self.transport.join(session_key, &channel_id, false, true).await {
                Ok(connection) => {
                    info!(
                        "Joined voice channel {} for session {} (attempt {})",
                        channel_id, session_key, tries
                    );
                    return Ok(connection);
                }
                Err(e) if tries < max_tries => {
                    warn!(
                        "Join attempt {}/{} for session {} failed: {:#}",
                        tries, max_tries, session_key, e
                    );
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "error joining voice channel after {} tries",
                        tries
                    )));
                }
            }
        }
    }

    /// Reset the session if the connection drops while this playback runs
    fn spawn_connection_monitor(
        &self,
        session: &Arc<Session>,
        connection: &Arc<dyn VoiceConnection>,
        player_id: uuid::Uuid,
        cancel_token: CancellationToken,
    ) {
        let registry = self.registry.clone();
        let session = Arc::clone(session);
        let connection = Arc::clone(connection);
        let interval = self.config.monitor_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if session.player().id() != player_id {
                    break;
                }

                if !connection.is_ready() {
                    warn!("Voice connection for {} lost, resetting session", session.key());
                    registry.reset(session.key()).await;
                    break;
                }
            }
            debug!("Connection monitor for {} stopped", session.key());
        });
    }

    async fn play_file(
        &self,
        connection: Arc<dyn VoiceConnection>,
        player: &Player,
        path: &Path,
    ) -> Result<()> {
        let mut process = DecodeProcess::spawn(&self.config.decoder, path)?;
        let encoder = self.codec.encoder().context("error creating encoder")?;

        let (pcm_tx, pcm_rx) = mpsc::channel(self.config.handoff_depth.max(1));
        let mut sender = tokio::spawn(send_pcm(connection, pcm_rx, player.subscribe(), encoder));
        let mut control = player.subscribe();

        loop {
            let frame = tokio::select! {
                biased;
                _ = stopped(&mut control) => {
                    stop_playback(&mut process, sender).await;
                    return Ok(());
                }
                frame = process.read_frame() => frame?,
            };

            let Some(frame) = frame else {
                break;
            };

            tokio::select! {
                biased;
                _ = stopped(&mut control) => {
                    stop_playback(&mut process, sender).await;
                    return Ok(());
                }
                sent = pcm_tx.send(frame) => {
                    if sent.is_err() {
                        return Err(sender_failure(sender).await);
                    }
                }
            }
        }

        debug!("Decoder reached end of stream");
        drop(pcm_tx);

        tokio::select! {
            biased;
            _ = stopped(&mut control) => {
                stop_playback(&mut process, sender).await;
            }
            joined = &mut sender => {
                joined
                    .context("encode/send stage panicked")?
                    .context("error in encode/send stage")?;
            }
        }

        Ok(())
    }
}

/// Resolves once the Player is stopped
async fn stopped(control: &mut watch::Receiver<PlayerState>) {
    if control
        .wait_for(|state| *state == PlayerState::Stopping)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}

async fn stop_playback(process: &mut DecodeProcess, sender: JoinHandle<Result<SenderStats>>) {
    info!("Stop requested, terminating decoder");
    sender.abort();
    process.kill().await;
}

async fn sender_failure(sender: JoinHandle<Result<SenderStats>>) -> anyhow::Error {
    match sender.await {
        Ok(Err(e)) => e.context("error in encode/send stage"),
        Ok(Ok(_)) => anyhow!("encode/send stage ended before end of input"),
        Err(e) => anyhow!("encode/send stage panicked: {}", e),
    }
}

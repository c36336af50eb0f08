//! In-memory voice transport.
//!
//! Used by the CLI and the test suite: connections never touch the network,
//! sent frames can be paced in real time and echoed back as an inbound
//! source, and remote speakers can be simulated with `inject`.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::connection::{
    SpeakingHandler, SpeakingUpdate, VoiceConnection, VoicePacket, VoiceState, VoiceTransport,
};
use crate::audio::FRAME_SIZE;

/// Loopback transport configuration
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// User id the local client joins as
    pub local_user_id: String,
    /// Minimum spacing between sent frames (None = send immediately)
    pub pacing: Option<Duration>,
    /// Echo sent frames back as inbound packets with this source tag
    pub echo_ssrc: Option<u32>,
    /// Inbound packet queue depth per connection
    pub inbound_depth: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            local_user_id: "loopback".to_string(),
            pacing: None,
            echo_ssrc: None,
            inbound_depth: 256,
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    connections: HashMap<String, Arc<LoopbackConnection>>,
    voice_states: HashMap<String, Vec<VoiceState>>,
    failing_joins: u32,
    join_attempts: u32,
}

pub struct LoopbackTransport {
    config: LoopbackConfig,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a user in a channel under a session key
    pub fn set_voice_state(&self, session_key: &str, user_id: &str, channel_id: &str) {
        let mut state = self.state();
        let states = state.voice_states.entry(session_key.to_string()).or_default();
        states.retain(|vs| vs.user_id != user_id);
        states.push(VoiceState {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        });
    }

    /// Refuse the next `n` join attempts
    pub fn fail_next_joins(&self, n: u32) {
        self.state().failing_joins = n;
    }

    /// Total join attempts seen so far
    pub fn join_attempts(&self) -> u32 {
        self.state().join_attempts
    }

    /// Concrete connection for a session key (ready or not)
    pub fn loopback_connection(&self, session_key: &str) -> Option<Arc<LoopbackConnection>> {
        self.state().connections.get(session_key).cloned()
    }
}

#[async_trait::async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn join(
        &self,
        session_key: &str,
        channel_id: &str,
        mute: bool,
        deaf: bool,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let existing = {
            let mut state = self.state();
            state.join_attempts += 1;
            if state.failing_joins > 0 {
                state.failing_joins -= 1;
                bail!("loopback join refused for {}", session_key);
            }
            state.connections.get(session_key).cloned()
        };

        if let Some(connection) = existing {
            if connection.is_ready() && connection.channel_id == channel_id {
                debug!("Reusing loopback connection for {}", session_key);
                return Ok(connection);
            }
            connection.close();
        }

        let connection = Arc::new(LoopbackConnection::new(
            session_key,
            channel_id,
            mute,
            deaf,
            &self.config,
        ));

        self.set_voice_state(session_key, &self.config.local_user_id, channel_id);
        self.state()
            .connections
            .insert(session_key.to_string(), Arc::clone(&connection));

        info!(
            "Loopback joined {} / {} (mute={}, deaf={})",
            session_key, channel_id, mute, deaf
        );

        Ok(connection)
    }

    fn connection(&self, session_key: &str) -> Option<Arc<dyn VoiceConnection>> {
        self.state()
            .connections
            .get(session_key)
            .filter(|c| c.is_ready())
            .map(|c| Arc::clone(c) as Arc<dyn VoiceConnection>)
    }

    async fn voice_states(&self, session_key: &str) -> Result<Vec<VoiceState>> {
        self.state()
            .voice_states
            .get(session_key)
            .cloned()
            .with_context(|| format!("unknown session {}", session_key))
    }

    async fn find_user_voice_channel(&self, user_id: &str) -> Result<String> {
        self.state()
            .voice_states
            .values()
            .flatten()
            .find(|vs| vs.user_id == user_id)
            .map(|vs| vs.channel_id.clone())
            .context("user is not in a voice channel")
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

pub struct LoopbackConnection {
    session_key: String,
    channel_id: String,
    mute: bool,
    deaf: bool,
    ready: AtomicBool,
    speaking: AtomicBool,
    reject_speaking: AtomicBool,
    frames_sent: AtomicU64,
    echo_ssrc: Option<u32>,
    echo_sequence: AtomicU16,
    echo_timestamp: AtomicU32,
    pacing: Option<tokio::sync::Mutex<Interval>>,
    inbound_tx: Mutex<Option<mpsc::Sender<VoicePacket>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<VoicePacket>>>,
    handlers: Mutex<Vec<SpeakingHandler>>,
}

impl LoopbackConnection {
    fn new(
        session_key: &str,
        channel_id: &str,
        mute: bool,
        deaf: bool,
        config: &LoopbackConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.inbound_depth);

        let pacing = config.pacing.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tokio::sync::Mutex::new(interval)
        });

        Self {
            session_key: session_key.to_string(),
            channel_id: channel_id.to_string(),
            mute,
            deaf,
            ready: AtomicBool::new(true),
            speaking: AtomicBool::new(false),
            reject_speaking: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            echo_ssrc: config.echo_ssrc,
            echo_sequence: AtomicU16::new(0),
            echo_timestamp: AtomicU32::new(0),
            pacing,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn inbound_sender(&self) -> Option<mpsc::Sender<VoicePacket>> {
        self.inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn is_deafened(&self) -> bool {
        self.deaf
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Simulate the remote side dropping the connection
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make subsequent `set_speaking` calls fail
    pub fn reject_speaking_updates(&self, reject: bool) {
        self.reject_speaking.store(reject, Ordering::SeqCst);
    }

    /// Deliver a packet as if it arrived from a remote speaker
    pub async fn inject(&self, packet: VoicePacket) -> Result<()> {
        let tx = self
            .inbound_sender()
            .context("loopback connection is closed")?;
        tx.send(packet)
            .await
            .map_err(|_| anyhow::anyhow!("loopback receiver dropped"))
    }

    /// Announce which user a source tag belongs to
    pub fn announce_speaker(&self, ssrc: u32, user_id: &str) {
        let update = SpeakingUpdate {
            ssrc,
            user_id: user_id.to_string(),
            speaking: true,
        };
        let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(&update);
        }
    }

    fn shut_inbound(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait::async_trait]
impl VoiceConnection for LoopbackConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn channel_id(&self) -> String {
        self.channel_id.clone()
    }

    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_ready() {
            bail!("loopback connection not ready");
        }

        if let Some(pacing) = &self.pacing {
            pacing.lock().await.tick().await;
        }

        self.frames_sent.fetch_add(1, Ordering::SeqCst);

        if let Some(ssrc) = self.echo_ssrc {
            if let Some(tx) = self.inbound_sender() {
                let packet = VoicePacket {
                    ssrc,
                    sequence: self.echo_sequence.fetch_add(1, Ordering::SeqCst),
                    timestamp: self
                        .echo_timestamp
                        .fetch_add(FRAME_SIZE as u32, Ordering::SeqCst),
                    payload: frame,
                };
                if tx.try_send(packet).is_err() {
                    debug!("Loopback inbound queue full, dropping echoed frame");
                }
            }
        }

        Ok(())
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<VoicePacket>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn add_speaking_handler(&self, handler: SpeakingHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        if self.reject_speaking.load(Ordering::SeqCst) {
            bail!("speaking update rejected by loopback transport");
        }
        self.speaking.store(speaking, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!("Loopback disconnect for {}", self.session_key);
        self.shut_inbound();
        Ok(())
    }

    fn close(&self) {
        self.shut_inbound();
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Encoded audio packet received from one remote source
#[derive(Debug, Clone)]
pub struct VoicePacket {
    /// Transport-assigned source tag of the speaker
    pub ssrc: u32,
    /// Transport sequence number
    pub sequence: u16,
    /// Transport timestamp (in samples)
    pub timestamp: u32,
    /// Encoded frame
    pub payload: Vec<u8>,
}

/// Delivered by the transport when a source tag starts or stops speaking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakingUpdate {
    pub ssrc: u32,
    pub user_id: String,
    pub speaking: bool,
}

/// A user present in a voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceState {
    pub user_id: String,
    pub channel_id: String,
}

pub type SpeakingHandler = Box<dyn Fn(&SpeakingUpdate) + Send + Sync>;

/// An established voice connection for one session key
///
/// Implementations own the authenticated low-level transport; this crate
/// only pushes encoded frames in and pulls encoded packets out.
#[async_trait::async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Whether the connection can currently carry audio
    fn is_ready(&self) -> bool;

    /// Channel this connection is joined to
    fn channel_id(&self) -> String;

    /// Send one encoded frame. May wait to pace frames in real time.
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()>;

    /// Take the inbound packet stream. Only the first caller gets it.
    fn take_receiver(&self) -> Option<mpsc::Receiver<VoicePacket>>;

    /// Register a handler for speaking updates (source tag → user identity)
    fn add_speaking_handler(&self, handler: SpeakingHandler);

    /// Toggle the "speaking" indicator
    async fn set_speaking(&self, speaking: bool) -> Result<()>;

    /// Leave the channel
    async fn disconnect(&self) -> Result<()>;

    /// Release transport resources
    fn close(&self);
}

/// Voice transport for a multi-tenant client
#[async_trait::async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Join a voice channel for a session key
    async fn join(
        &self,
        session_key: &str,
        channel_id: &str,
        mute: bool,
        deaf: bool,
    ) -> Result<Arc<dyn VoiceConnection>>;

    /// Current connection for a session key, if any
    fn connection(&self, session_key: &str) -> Option<Arc<dyn VoiceConnection>>;

    /// Users present in voice under a session key
    async fn voice_states(&self, session_key: &str) -> Result<Vec<VoiceState>>;

    /// Channel a user is currently in, across all session keys
    async fn find_user_voice_channel(&self, user_id: &str) -> Result<String>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

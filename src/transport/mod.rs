//! Voice transport interfaces.
//!
//! The transport itself (signaling, encryption, UDP) lives outside this
//! crate; pipelines only depend on the `VoiceTransport` / `VoiceConnection`
//! traits. `LoopbackTransport` is an in-memory implementation.

pub mod connection;
pub mod loopback;
pub mod presence;

pub use connection::{
    SpeakingHandler, SpeakingUpdate, VoiceConnection, VoicePacket, VoiceState, VoiceTransport,
};
pub use loopback::{LoopbackConfig, LoopbackConnection, LoopbackTransport};
pub use presence::{is_channel_empty, leave_voice, users_in_voice_channels};

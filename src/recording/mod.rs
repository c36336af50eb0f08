//! Inbound recording
//!
//! Packets from the voice connection are decoded per source tag, buffered
//! per speaker and written to one WAV file per speaker after a silence.

mod identity;
mod receiver;
mod recorder;
mod session;

pub use identity::SourceIdentities;
pub use receiver::{receive_pcm, ConnectionClosed, DecodedPacket, ReceiveStats, SourceDecoders};
pub use recorder::{FlushReason, FlushReport, RecorderConfig, RecordingSummary, SpeakerRecorder};
pub use session::{save_channel_audio, RecordingOptions};

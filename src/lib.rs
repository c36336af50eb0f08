pub mod audio;
pub mod config;
pub mod http;
pub mod playback;
pub mod recording;
pub mod session;
pub mod transport;

pub use audio::{codec_by_name, AudioFile, Codec, DecoderCommand, PcmCodec};
pub use config::Config;
pub use http::{create_router, AppState};
pub use playback::{send_pcm, PlaybackController, SenderStats};
pub use recording::{
    receive_pcm, save_channel_audio, FlushReason, FlushReport, RecorderConfig, RecordingOptions,
    RecordingSummary, SourceIdentities, SpeakerRecorder,
};
pub use session::{Player, PlayerState, Session, SessionConfig, SessionRegistry, SessionStatus};
pub use transport::{LoopbackConfig, LoopbackTransport, VoiceConnection, VoiceTransport};

pub mod codec;
pub mod decoder;
pub mod file;
pub mod frame;

pub use codec::{codec_by_name, Codec, FrameDecoder, FrameEncoder, PcmCodec};
#[cfg(feature = "opus")]
pub use codec::OpusCodec;
pub use decoder::{DecodeProcess, DecoderCommand};
pub use file::AudioFile;
pub use frame::{CHANNELS, FRAME_DURATION, FRAME_SAMPLES, FRAME_SIZE, MAX_ENCODED_BYTES, SAMPLE_RATE};

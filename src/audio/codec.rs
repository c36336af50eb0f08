//! Wire codecs for voice frames.
//!
//! A `Codec` is a factory: the Encode/Send stage takes one encoder per
//! playback and the Receive/Decode stage takes one decoder per source tag.

use anyhow::{bail, Result};
use std::sync::Arc;

use super::frame::{CHANNELS, MAX_ENCODED_BYTES};

/// Encodes one frame of interleaved PCM into a wire payload
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;
}

/// Decodes one wire payload into a caller-provided scratch buffer
pub trait FrameDecoder: Send {
    /// Returns the number of decoded samples per channel
    fn decode(&mut self, payload: &[u8], pcm: &mut [i16]) -> Result<usize>;
}

/// Codec factory shared by all pipelines of a process
pub trait Codec: Send + Sync {
    /// Codec name for logging
    fn name(&self) -> &str;

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>>;

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>>;
}

/// Look up a codec by its configured name
pub fn codec_by_name(name: &str) -> Result<Arc<dyn Codec>> {
    match name {
        "pcm" => Ok(Arc::new(PcmCodec)),
        #[cfg(feature = "opus")]
        "opus" => Ok(Arc::new(OpusCodec)),
        other => bail!("Unsupported voice codec: {}", other),
    }
}

/// Lossless codec: frames travel as raw little-endian i16 samples.
///
/// Used by the loopback transport and wherever bit-exact round trips matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmCodec;

impl Codec for PcmCodec {
    fn name(&self) -> &str {
        "pcm"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
        Ok(Box::new(PcmEncoder))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(PcmDecoder))
    }
}

struct PcmEncoder;

impl FrameEncoder for PcmEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() * 2 > MAX_ENCODED_BYTES {
            bail!(
                "Frame too large: {} samples (max {} bytes)",
                pcm.len(),
                MAX_ENCODED_BYTES
            );
        }
        Ok(super::frame::samples_to_le_bytes(pcm))
    }
}

struct PcmDecoder;

impl FrameDecoder for PcmDecoder {
    fn decode(&mut self, payload: &[u8], pcm: &mut [i16]) -> Result<usize> {
        let frame_bytes = 2 * CHANNELS as usize;
        if payload.len() % frame_bytes != 0 {
            bail!(
                "Corrupt PCM payload: {} bytes is not a whole number of {}-channel samples",
                payload.len(),
                CHANNELS
            );
        }

        let samples = payload.len() / 2;
        if samples > pcm.len() {
            bail!(
                "PCM payload of {} samples exceeds scratch buffer of {}",
                samples,
                pcm.len()
            );
        }

        for (dst, b) in pcm.iter_mut().zip(payload.chunks_exact(2)) {
            *dst = i16::from_le_bytes([b[0], b[1]]);
        }

        Ok(samples / CHANNELS as usize)
    }
}

/// Opus at 48kHz stereo, tuned for voice
#[cfg(feature = "opus")]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpusCodec;

#[cfg(feature = "opus")]
impl Codec for OpusCodec {
    fn name(&self) -> &str {
        "opus"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
        let encoder = opus::Encoder::new(
            super::frame::SAMPLE_RATE,
            opus::Channels::Stereo,
            opus::Application::Voip,
        )?;
        Ok(Box::new(OpusFrameEncoder { encoder }))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        let decoder = opus::Decoder::new(super::frame::SAMPLE_RATE, opus::Channels::Stereo)?;
        Ok(Box::new(OpusFrameDecoder { decoder }))
    }
}

#[cfg(feature = "opus")]
struct OpusFrameEncoder {
    encoder: opus::Encoder,
}

#[cfg(feature = "opus")]
impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut opus_buf = vec![0u8; MAX_ENCODED_BYTES];
        let encoded_len = self.encoder.encode(pcm, &mut opus_buf)?;
        opus_buf.truncate(encoded_len);
        Ok(opus_buf)
    }
}

#[cfg(feature = "opus")]
struct OpusFrameDecoder {
    decoder: opus::Decoder,
}

#[cfg(feature = "opus")]
impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, payload: &[u8], pcm: &mut [i16]) -> Result<usize> {
        Ok(self.decoder.decode(payload, pcm, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{FRAME_SAMPLES, FRAME_SIZE};

    #[test]
    fn test_pcm_codec_is_lossless() {
        let codec = PcmCodec;
        let mut encoder = codec.encoder().unwrap();
        let mut decoder = codec.decoder().unwrap();

        let frame: Vec<i16> = (0..FRAME_SAMPLES).map(|i| (i as i16).wrapping_mul(37)).collect();
        let payload = encoder.encode(&frame).unwrap();

        let mut scratch = vec![0i16; FRAME_SAMPLES];
        let per_channel = decoder.decode(&payload, &mut scratch).unwrap();

        assert_eq!(per_channel, FRAME_SIZE);
        assert_eq!(scratch, frame);
    }

    #[test]
    fn test_pcm_decoder_rejects_odd_payload() {
        let mut decoder = PcmCodec.decoder().unwrap();
        let mut scratch = vec![0i16; FRAME_SAMPLES];

        assert!(decoder.decode(&[1, 2, 3], &mut scratch).is_err());
    }

    #[test]
    fn test_unknown_codec_name() {
        assert!(codec_by_name("pcm").is_ok());
        assert!(codec_by_name("vorbis").is_err());
    }
}

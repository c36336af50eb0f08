use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Sample rate of every PCM stream handled by the pipelines
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count (stereo)
pub const CHANNELS: u16 = 2;

/// Samples per channel in one frame (20ms at 48kHz)
pub const FRAME_SIZE: usize = 960;

/// Interleaved i16 samples in one frame
pub const FRAME_SAMPLES: usize = FRAME_SIZE * CHANNELS as usize;

/// Upper bound for one encoded frame
pub const MAX_ENCODED_BYTES: usize = (FRAME_SIZE * 2) * CHANNELS as usize;

/// Wall-clock duration of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Read one frame of signed 16-bit little-endian interleaved PCM.
///
/// Returns `Ok(None)` at end of input. A trailing partial frame is treated
/// as end of input and dropped.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<i16>>>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; FRAME_SAMPLES * 2];
    let mut filled = 0;

    while filled < bytes.len() {
        let n = reader.read(&mut bytes[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled < bytes.len() {
        if filled > 0 {
            debug!("Dropping trailing partial frame ({} bytes)", filled);
        }
        return Ok(None);
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    Ok(Some(samples))
}

/// Serialize interleaved samples as little-endian bytes
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_encoded_bytes_matches_frame_geometry() {
        assert_eq!(MAX_ENCODED_BYTES, 3840);
        assert_eq!(FRAME_SAMPLES, 1920);
    }

    #[tokio::test]
    async fn test_read_frame_then_eof() {
        let samples: Vec<i16> = (0..FRAME_SAMPLES as i16).collect();
        let bytes = samples_to_le_bytes(&samples);
        let mut reader = &bytes[..];

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, samples);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_frame_is_end_of_input() {
        let bytes = vec![1u8; FRAME_SAMPLES];
        let mut reader = &bytes[..];

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}

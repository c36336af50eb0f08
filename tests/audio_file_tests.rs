// Integration tests for WAV file handling
//
// These tests verify that recorded PCM is written as 16-bit WAV at the
// voice pipeline's format and reads back unchanged.

use anyhow::Result;
use loqa_voice::audio::{AudioFile, CHANNELS, SAMPLE_RATE};
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_audio_file_write_then_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("speaker.wav");

    // One second of a stereo ramp
    let samples: Vec<i16> = (0..SAMPLE_RATE as usize * CHANNELS as usize)
        .map(|i| (i % 65536) as u16 as i16)
        .collect();

    AudioFile::write(&path, &samples, SAMPLE_RATE, CHANNELS)?;
    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, SAMPLE_RATE);
    assert_eq!(audio.channels, CHANNELS);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9, "Duration should be 1s");
    assert_eq!(audio.samples, samples);
    assert!(audio.path.contains("speaker.wav"));

    Ok(())
}

#[test]
fn test_audio_file_write_replaces_existing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("speaker.wav");

    AudioFile::write(&path, &[1; 4000], SAMPLE_RATE, CHANNELS)?;
    AudioFile::write(&path, &[2; 8], SAMPLE_RATE, CHANNELS)?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.samples, vec![2; 8], "Second write should replace the first");

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_write_to_missing_directory() {
    let path = PathBuf::from("/nonexistent/dir/speaker.wav");
    let err = AudioFile::write(&path, &[0; 4], SAMPLE_RATE, CHANNELS).unwrap_err();

    assert!(format!("{:#}", err).contains("Failed to create WAV file"));
}

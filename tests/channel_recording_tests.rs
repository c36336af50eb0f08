// Integration tests for recording a whole voice channel
//
// Remote speakers are simulated on the loopback transport: packets are
// injected into the joined connection and speaking updates announce which
// user owns each source tag.

use anyhow::Result;
use loqa_voice::audio::frame::samples_to_le_bytes;
use loqa_voice::audio::{AudioFile, DecoderCommand, PcmCodec, FRAME_SAMPLES};
use loqa_voice::recording::{save_channel_audio, FlushReason, RecorderConfig, RecordingOptions};
use loqa_voice::session::{SessionConfig, SessionRegistry};
use loqa_voice::transport::{
    leave_voice, LoopbackConfig, LoopbackConnection, LoopbackTransport, VoiceConnection,
    VoicePacket, VoiceTransport,
};
use loqa_voice::PlaybackController;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const KEY: &str = "guild-1";

fn options(output_dir: &std::path::Path) -> RecordingOptions {
    RecordingOptions {
        settle_delay: Duration::ZERO,
        ..RecordingOptions::new(RecorderConfig::new(
            output_dir.to_path_buf(),
            Duration::from_secs(5),
        ))
    }
}

async fn wait_for_connection(transport: &LoopbackTransport) -> Arc<LoopbackConnection> {
    loop {
        if let Some(connection) = transport.loopback_connection(KEY) {
            return connection;
        }
        tokio::task::yield_now().await;
    }
}

fn voice_packet(ssrc: u32, sequence: u16, value: i16) -> VoicePacket {
    VoicePacket {
        ssrc,
        sequence,
        timestamp: sequence as u32 * 960,
        payload: samples_to_le_bytes(&vec![value; FRAME_SAMPLES]),
    }
}

#[tokio::test]
async fn test_records_each_speaker_to_its_own_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let transport = Arc::new(LoopbackTransport::new(LoopbackConfig::default()));

    let handle = {
        let transport = Arc::clone(&transport);
        let options = options(temp_dir.path());
        tokio::spawn(async move {
            save_channel_audio(&*transport, Arc::new(PcmCodec), KEY, "voice-1", options)
                .await
        })
    };

    let connection = wait_for_connection(&transport).await;
    assert!(connection.is_muted(), "Recording joins muted");
    assert!(!connection.is_deafened(), "Recording must hear the channel");

    connection.announce_speaker(11, "alice");
    for seq in 0..3u16 {
        connection.inject(voice_packet(11, seq, 11)).await?;
        connection.inject(voice_packet(22, seq, 22)).await?;
    }

    leave_voice(&*transport, KEY).await?;
    let summary = tokio::time::timeout(Duration::from_secs(5), handle).await???;

    assert_eq!(summary.packets, 6);
    assert_eq!(summary.sources, 2);
    assert_eq!(summary.flushes_for(11, FlushReason::Shutdown), 1);
    assert_eq!(summary.flushes_for(22, FlushReason::Shutdown), 1);

    let alice = AudioFile::open(temp_dir.path().join("alice.wav"))?;
    assert_eq!(alice.samples, vec![11; 3 * FRAME_SAMPLES]);

    let unknown = AudioFile::open(temp_dir.path().join("ssrc-22.wav"))?;
    assert_eq!(unknown.samples, vec![22; 3 * FRAME_SAMPLES]);

    assert!(!connection.is_ready(), "Connection is closed after recording");

    Ok(())
}

#[tokio::test]
async fn test_corrupt_packet_ends_recording_with_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let transport = Arc::new(LoopbackTransport::new(LoopbackConfig::default()));

    let handle = {
        let transport = Arc::clone(&transport);
        let options = options(temp_dir.path());
        tokio::spawn(async move {
            save_channel_audio(&*transport, Arc::new(PcmCodec), KEY, "voice-1", options)
                .await
        })
    };

    let connection = wait_for_connection(&transport).await;
    connection.inject(voice_packet(5, 0, 5)).await?;
    connection
        .inject(VoicePacket {
            ssrc: 5,
            sequence: 1,
            timestamp: 960,
            payload: vec![1, 2, 3],
        })
        .await?;

    let err = tokio::time::timeout(Duration::from_secs(5), handle)
        .await??
        .unwrap_err();

    assert!(
        format!("{:#}", err).contains("error decoding audio from source 5"),
        "Unexpected error: {:#}",
        err
    );
    assert!(!connection.is_ready(), "Connection is closed on failure too");

    // Audio received before the failure is still saved
    let audio = AudioFile::open(temp_dir.path().join("ssrc-5.wav"))?;
    assert_eq!(audio.samples, vec![5; FRAME_SAMPLES]);

    Ok(())
}

#[tokio::test]
async fn test_join_failure_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    transport.fail_next_joins(1);

    let err = save_channel_audio(
        &transport,
        Arc::new(PcmCodec),
        KEY,
        "voice-1",
        options(temp_dir.path()),
    )
    .await
    .unwrap_err();

    assert!(format!("{:#}", err).contains("error joining voice channel"));

    Ok(())
}

#[tokio::test]
async fn test_played_audio_is_recorded_back_unchanged() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let samples: Vec<i16> = (0..20 * FRAME_SAMPLES)
        .map(|i| ((i * 37) % 65536) as u16 as i16)
        .collect();
    let clip = temp_dir.path().join("clip.raw");
    std::fs::write(&clip, samples_to_le_bytes(&samples))?;
    let output_dir = temp_dir.path().join("recordings");

    let transport = Arc::new(LoopbackTransport::new(LoopbackConfig {
        echo_ssrc: Some(77),
        ..LoopbackConfig::default()
    }));
    transport.set_voice_state(KEY, "listener", "voice-1");

    let handle = {
        let transport = Arc::clone(&transport);
        let options = options(&output_dir);
        tokio::spawn(async move {
            save_channel_audio(&*transport, Arc::new(PcmCodec), KEY, "voice-1", options)
                .await
        })
    };
    let connection = wait_for_connection(&transport).await;

    // Playback joins the same channel and reuses the recording connection
    let controller = PlaybackController::new(
        SessionRegistry::new(),
        Arc::clone(&transport) as Arc<dyn VoiceTransport>,
        Arc::new(PcmCodec),
        SessionConfig {
            join_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            decoder: DecoderCommand {
                program: "cat".to_string(),
                args: vec!["{input}".to_string()],
            },
            ..SessionConfig::default()
        },
    );
    controller.play(KEY, "listener", &clip).await?;
    assert_eq!(connection.frames_sent(), 20);

    leave_voice(&*transport, KEY).await?;
    let summary = tokio::time::timeout(Duration::from_secs(5), handle).await???;

    assert_eq!(summary.packets, 20);
    assert_eq!(summary.flushes_for(77, FlushReason::Shutdown), 1);

    let audio = AudioFile::open(output_dir.join("ssrc-77.wav"))?;
    assert_eq!(audio.samples, samples, "Echoed audio should be bit-exact");

    Ok(())
}

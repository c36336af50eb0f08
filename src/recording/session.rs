use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::identity::SourceIdentities;
use super::receiver::{receive_pcm, ConnectionClosed, SourceDecoders};
use super::recorder::{RecorderConfig, RecordingSummary, SpeakerRecorder};
use crate::audio::Codec;
use crate::transport::VoiceTransport;

/// Options for one channel recording
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub recorder: RecorderConfig,
    /// Decoded packets buffered between the receive stage and the recorder
    pub queue_depth: usize,
    /// Delay after disconnecting before returning
    pub settle_delay: Duration,
}

impl RecordingOptions {
    pub fn new(recorder: RecorderConfig) -> Self {
        Self {
            recorder,
            queue_depth: 100,
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Join a voice channel and save each speaker's audio until the
/// connection stops delivering packets.
///
/// Losing the connection (for instance after leaving the channel) is how a
/// recording normally ends and yields the summary; decode failures are
/// returned as errors after what was buffered has been flushed.
///
/// The connection is always disconnected and closed before returning.
pub async fn save_channel_audio(
    transport: &dyn VoiceTransport,
    codec: Arc<dyn Codec>,
    session_key: &str,
    channel_id: &str,
    options: RecordingOptions,
) -> Result<RecordingSummary> {
    let identities = SourceIdentities::new();
    let recorder = SpeakerRecorder::new(options.recorder.clone(), identities.clone())?;

    let connection = transport
        .join(session_key, channel_id, true, false)
        .await
        .context("error joining voice channel")?;

    connection.add_speaking_handler(identities.speaking_handler());

    info!(
        "Recording channel {} for session {} into {}",
        channel_id,
        session_key,
        options.recorder.output_dir.display()
    );

    let (packet_tx, packet_rx) = mpsc::channel(options.queue_depth.max(1));
    let decoders = SourceDecoders::new(codec, options.recorder.eviction_timeout());
    let receiver = tokio::spawn(receive_pcm(Arc::clone(&connection), decoders, packet_tx));

    let summary = recorder.record(packet_rx).await;

    let receive_result = match receiver.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => match e.downcast_ref::<ConnectionClosed>() {
            Some(closed) => {
                info!("Recording for {} ended: {}", session_key, closed);
                Ok(())
            }
            None => Err(e),
        },
        Err(e) => Err(anyhow::anyhow!("receive stage panicked: {}", e)),
    };

    if let Err(e) = connection.disconnect().await {
        error!("Error disconnecting from voice channel: {:#}", e);
    }
    connection.close();

    tokio::time::sleep(options.settle_delay).await;

    let summary = summary?;
    if let Err(e) = receive_result {
        warn!(
            "Receive stage for {} failed after {} flushes",
            session_key,
            summary.total_flushes
        );
        return Err(e.context("error receiving voice audio"));
    }

    Ok(summary)
}

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::audio::FrameEncoder;
use crate::session::PlayerState;
use crate::transport::VoiceConnection;

/// Frame counts for one run of the Encode/Send stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub frames_skipped: u64,
}

/// Encode PCM frames from `pcm_rx` and send them to the connection.
///
/// The Player state is sampled once per frame: frames consumed while paused
/// are discarded without encoding. Returns when the queue is closed; fails
/// when the connection is not ready or encoding fails.
pub async fn send_pcm(
    connection: Arc<dyn VoiceConnection>,
    mut pcm_rx: mpsc::Receiver<Vec<i16>>,
    control: watch::Receiver<PlayerState>,
    mut encoder: Box<dyn FrameEncoder>,
) -> Result<SenderStats> {
    let mut stats = SenderStats::default();
    let mut paused = false;

    while let Some(pcm) = pcm_rx.recv().await {
        let now_paused = *control.borrow() == PlayerState::Paused;
        if now_paused != paused {
            debug!("Playback {}", if now_paused { "paused" } else { "resumed" });
            paused = now_paused;
        }

        if paused {
            stats.frames_skipped += 1;
            continue;
        }

        let frame = encoder.encode(&pcm).context("error encoding audio")?;

        if !connection.is_ready() {
            bail!("voice connection not ready");
        }

        connection
            .send_frame(frame)
            .await
            .context("error sending audio frame")?;
        stats.frames_sent += 1;
    }

    info!(
        "PCM queue closed: {} frames sent, {} skipped while paused",
        stats.frames_sent, stats.frames_skipped
    );

    Ok(stats)
}

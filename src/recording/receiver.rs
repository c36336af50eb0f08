use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::audio::{Codec, FrameDecoder, CHANNELS, FRAME_SAMPLES};
use crate::transport::{VoiceConnection, VoicePacket};

/// Inbound packet with its decoded PCM attached
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub ssrc: u32,
    pub sequence: u16,
    pub timestamp: u32,
    /// Interleaved PCM
    pub pcm: Vec<i16>,
}

struct SourceDecoderState {
    decoder: Box<dyn FrameDecoder>,
    /// Scratch buffer sized to one frame
    pcm: Vec<i16>,
    last_used: Instant,
}

/// One decoder per active source tag, dropped after sitting idle
pub struct SourceDecoders {
    codec: Arc<dyn Codec>,
    states: HashMap<u32, SourceDecoderState>,
    idle_timeout: Duration,
    last_sweep: Instant,
}

impl SourceDecoders {
    /// `idle_timeout` of zero keeps decoders for the whole run
    pub fn new(codec: Arc<dyn Codec>, idle_timeout: Duration) -> Self {
        Self {
            codec,
            states: HashMap::new(),
            idle_timeout,
            last_sweep: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, ssrc: u32) -> bool {
        self.states.contains_key(&ssrc)
    }

    /// Decode a packet with its source's decoder, creating it on first use
    pub fn decode(&mut self, packet: &VoicePacket) -> Result<Vec<i16>> {
        self.evict_idle();

        let state = match self.states.entry(packet.ssrc) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let decoder = self
                    .codec
                    .decoder()
                    .with_context(|| format!("error creating decoder for source {}", packet.ssrc))?;
                debug!("New audio source {} ({} decoder)", packet.ssrc, self.codec.name());
                entry.insert(SourceDecoderState {
                    decoder,
                    pcm: vec![0i16; FRAME_SAMPLES],
                    last_used: Instant::now(),
                })
            }
        };

        let per_channel = state
            .decoder
            .decode(&packet.payload, &mut state.pcm)
            .with_context(|| format!("error decoding audio from source {}", packet.ssrc))?;
        state.last_used = Instant::now();

        Ok(state.pcm[..per_channel * CHANNELS as usize].to_vec())
    }

    fn evict_idle(&mut self) {
        if self.idle_timeout.is_zero() || self.last_sweep.elapsed() < self.idle_timeout {
            return;
        }
        self.last_sweep = Instant::now();

        let idle_timeout = self.idle_timeout;
        let before = self.states.len();
        self.states
            .retain(|_, state| state.last_used.elapsed() < idle_timeout);

        if self.states.len() < before {
            debug!("Evicted {} idle source decoders", before - self.states.len());
        }
    }
}

/// How often the receive stage re-checks connection readiness while no
/// packets arrive
const READY_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// The voice connection stopped delivering audio mid-stream.
///
/// Returned by [`receive_pcm`] when the transport closes its packet stream or
/// stops being ready. Callers that end a recording by leaving the channel
/// can tell this apart from decode failures with `downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClosed {
    StreamEnded,
    NotReady,
}

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionClosed::StreamEnded => write!(f, "voice connection stopped producing audio"),
            ConnectionClosed::NotReady => write!(f, "voice connection not ready"),
        }
    }
}

impl std::error::Error for ConnectionClosed {}

/// Packet counts for one run of the Receive/Decode stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub packets: u64,
    pub sources: usize,
}

/// Read inbound packets, decode them per source and forward them downstream.
///
/// Only the downstream consumer going away ends the stage cleanly. A packet
/// stream that ends or a connection that stops being ready fails with
/// [`ConnectionClosed`]; any decode error aborts the stage too. Packets
/// already queued are decoded before either is reported.
pub async fn receive_pcm(
    connection: Arc<dyn VoiceConnection>,
    mut decoders: SourceDecoders,
    out: mpsc::Sender<DecodedPacket>,
) -> Result<ReceiveStats> {
    if !connection.is_ready() {
        bail!("voice connection not ready to receive audio");
    }

    let mut packets = connection
        .take_receiver()
        .context("voice connection has no inbound audio stream")?;

    let mut stats = ReceiveStats::default();
    let mut ready_check = tokio::time::interval(READY_CHECK_INTERVAL);
    ready_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let packet = tokio::select! {
            biased;
            packet = packets.recv() => packet,
            _ = ready_check.tick() => {
                if !connection.is_ready() {
                    info!("Receive stage stopped after {} packets: connection not ready", stats.packets);
                    return Err(ConnectionClosed::NotReady.into());
                }
                continue;
            }
        };

        let Some(packet) = packet else {
            info!(
                "Receive stage stopped after {} packets from up to {} concurrent sources",
                stats.packets, stats.sources
            );
            return Err(ConnectionClosed::StreamEnded.into());
        };

        let pcm = decoders.decode(&packet)?;
        stats.packets += 1;
        stats.sources = stats.sources.max(decoders.len());

        let decoded = DecodedPacket {
            ssrc: packet.ssrc,
            sequence: packet.sequence,
            timestamp: packet.timestamp,
            pcm,
        };

        if out.send(decoded).await.is_err() {
            debug!("Recorder closed, stopping receive stage");
            return Ok(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{frame::samples_to_le_bytes, PcmCodec};
    use crate::transport::{LoopbackConfig, LoopbackTransport, VoiceTransport};

    fn packet(ssrc: u32, value: i16) -> VoicePacket {
        VoicePacket {
            ssrc,
            sequence: 0,
            timestamp: 0,
            payload: samples_to_le_bytes(&vec![value; FRAME_SAMPLES]),
        }
    }

    #[tokio::test]
    async fn test_one_decoder_per_source() {
        let mut decoders = SourceDecoders::new(Arc::new(PcmCodec), Duration::ZERO);

        decoders.decode(&packet(1, 10)).unwrap();
        decoders.decode(&packet(2, 20)).unwrap();
        let pcm = decoders.decode(&packet(1, 11)).unwrap();

        assert_eq!(decoders.len(), 2);
        assert_eq!(pcm, vec![11; FRAME_SAMPLES]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_an_error() {
        let mut decoders = SourceDecoders::new(Arc::new(PcmCodec), Duration::ZERO);
        let bad = VoicePacket {
            ssrc: 3,
            sequence: 0,
            timestamp: 0,
            payload: vec![0u8; 3],
        };

        let err = decoders.decode(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("source 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_decoders_are_evicted() {
        let mut decoders = SourceDecoders::new(Arc::new(PcmCodec), Duration::from_secs(2));

        decoders.decode(&packet(1, 1)).unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        decoders.decode(&packet(2, 2)).unwrap();

        assert!(!decoders.contains(1));
        assert!(decoders.contains(2));
    }

    async fn receive_from_loopback() -> (
        Arc<crate::transport::LoopbackConnection>,
        mpsc::Receiver<DecodedPacket>,
        tokio::task::JoinHandle<Result<ReceiveStats>>,
    ) {
        let transport = LoopbackTransport::new(LoopbackConfig::default());
        let connection = transport.join("guild", "voice", true, false).await.unwrap();
        let loopback = transport.loopback_connection("guild").unwrap();

        let (tx, rx) = mpsc::channel(16);
        let decoders = SourceDecoders::new(Arc::new(PcmCodec), Duration::ZERO);
        let handle = tokio::spawn(receive_pcm(connection, decoders, tx));
        (loopback, rx, handle)
    }

    #[tokio::test]
    async fn test_disconnect_is_reported_after_queued_packets() {
        let (connection, mut rx, handle) = receive_from_loopback().await;

        connection.inject(packet(1, 5)).await.unwrap();
        connection.disconnect().await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConnectionClosed>(),
            Some(&ConnectionClosed::StreamEnded)
        );
        assert_eq!(rx.recv().await.map(|p| p.pcm), Some(vec![5; FRAME_SAMPLES]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_losing_readiness_is_an_error() {
        let (connection, _rx, handle) = receive_from_loopback().await;

        connection.set_ready(false);
        tokio::time::sleep(READY_CHECK_INTERVAL * 2).await;

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConnectionClosed>(),
            Some(&ConnectionClosed::NotReady)
        );
    }

    #[tokio::test]
    async fn test_closed_recorder_ends_stage_cleanly() {
        let (connection, rx, handle) = receive_from_loopback().await;
        drop(rx);

        connection.inject(packet(2, 1)).await.unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.packets, 1);
    }
}

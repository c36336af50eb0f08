use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::identity::SourceIdentities;
use super::receiver::DecodedPacket;
use crate::audio::{AudioFile, CHANNELS, SAMPLE_RATE};

/// Per-speaker recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Inactivity after which a speaker's audio is written out
    pub silence_threshold: Duration,
    /// Directory receiving one WAV file per speaker
    pub output_dir: PathBuf,
    /// Sample rate of decoded PCM
    pub sample_rate: u32,
    /// Channel count of decoded PCM
    pub channels: u16,
    /// Drop a speaker's state after this many silent intervals with nothing
    /// buffered (0 = never)
    pub evict_after_intervals: u32,
    /// Flush reports kept in the summary; older ones are only counted
    pub max_flush_reports: usize,
}

impl RecorderConfig {
    pub fn new(output_dir: PathBuf, silence_threshold: Duration) -> Self {
        Self {
            silence_threshold,
            output_dir,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            evict_after_intervals: 4,
            max_flush_reports: 1000,
        }
    }

    /// Idle time after which per-source state is dropped
    pub fn eviction_timeout(&self) -> Duration {
        self.silence_threshold * self.evict_after_intervals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushReason {
    /// The speaker went quiet for the silence threshold
    Silence,
    /// The recording ended with audio still buffered
    Shutdown,
}

/// One utterance written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushReport {
    pub ssrc: u32,
    pub identity: String,
    pub path: PathBuf,
    /// Interleaved samples written
    pub samples: usize,
    pub reason: FlushReason,
    pub flushed_at: DateTime<Utc>,
}

/// Outcome of one recording run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub recording_id: Uuid,
    pub packets: u64,
    pub sources: usize,
    /// Most recent flushes, oldest first
    pub flushes: Vec<FlushReport>,
    /// Every successful flush, including those no longer in `flushes`
    pub total_flushes: usize,
    pub failed_flushes: usize,
    #[serde(skip)]
    flush_counts: HashMap<(u32, FlushReason), usize>,
}

impl RecordingSummary {
    /// Flushes of one source for one reason
    pub fn flushes_for(&self, ssrc: u32, reason: FlushReason) -> usize {
        self.flush_counts.get(&(ssrc, reason)).copied().unwrap_or(0)
    }
}

/// Successful flushes of one run: the latest reports plus per-source counts
#[derive(Debug, Default)]
struct FlushLog {
    recent: VecDeque<FlushReport>,
    capacity: usize,
    total: usize,
    counts: HashMap<(u32, FlushReason), usize>,
}

impl FlushLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn push(&mut self, report: FlushReport) {
        self.total += 1;
        *self.counts.entry((report.ssrc, report.reason)).or_insert(0) += 1;

        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(report);
    }
}

#[derive(Debug)]
struct SpeakerBuffer {
    samples: Vec<i16>,
    last_packet: Instant,
    /// Set once the entry has been removed from the map
    evicted: bool,
}

type SharedBuffer = Arc<Mutex<SpeakerBuffer>>;

fn lock(buffer: &SharedBuffer) -> std::sync::MutexGuard<'_, SpeakerBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Source tag → buffer. The map lock is only taken to look up, insert or
/// evict an entry; appends and swaps lock the single entry.
#[derive(Default)]
struct SpeakerBuffers {
    entries: RwLock<HashMap<u32, SharedBuffer>>,
}

impl SpeakerBuffers {
    fn get(&self, ssrc: u32) -> Option<SharedBuffer> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ssrc)
            .cloned()
    }

    fn get_or_insert(&self, ssrc: u32) -> (SharedBuffer, bool) {
        if let Some(entry) = self.get(ssrc) {
            return (entry, false);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&ssrc) {
            return (Arc::clone(entry), false);
        }

        let entry = Arc::new(Mutex::new(SpeakerBuffer {
            samples: Vec::new(),
            last_packet: Instant::now(),
            evicted: false,
        }));
        entries.insert(ssrc, Arc::clone(&entry));
        (entry, true)
    }

    /// Append PCM for a source. Returns true when the source is new.
    fn append(&self, ssrc: u32, pcm: &[i16]) -> bool {
        loop {
            let (entry, created) = self.get_or_insert(ssrc);
            let mut buffer = lock(&entry);
            if buffer.evicted {
                continue;
            }
            buffer.samples.extend_from_slice(pcm);
            buffer.last_packet = Instant::now();
            return created;
        }
    }

    /// Remove a source whose buffer is still empty and idle for `idle`
    fn evict_if_idle(&self, ssrc: u32, entry: &SharedBuffer, idle: Duration) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut buffer = lock(entry);
        if !buffer.samples.is_empty() || buffer.last_packet.elapsed() < idle {
            return false;
        }
        buffer.evicted = true;
        entries.remove(&ssrc);
        true
    }

    fn drain(&self) -> Vec<(u32, SharedBuffer)> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect()
    }
}

struct RecorderShared {
    config: RecorderConfig,
    identities: SourceIdentities,
    buffers: SpeakerBuffers,
    flushes: Mutex<FlushLog>,
    failed_flushes: Mutex<usize>,
}

impl RecorderShared {
    fn flush(&self, ssrc: u32, samples: Vec<i16>, reason: FlushReason) {
        let identity = self.identities.file_stem(ssrc);
        let path = self.config.output_dir.join(format!("{}.wav", identity));

        match AudioFile::write(&path, &samples, self.config.sample_rate, self.config.channels) {
            Ok(()) => {
                debug!("Flushed source {} ({:?})", ssrc, reason);
                self.flushes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(FlushReport {
                        ssrc,
                        identity,
                        path,
                        samples: samples.len(),
                        reason,
                        flushed_at: Utc::now(),
                    });
            }
            Err(e) => {
                error!("Error saving audio for source {}: {:#}", ssrc, e);
                *self
                    .failed_flushes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) += 1;
            }
        }
    }
}

/// Accumulates decoded PCM per speaker and writes each speaker's audio to
/// `<output_dir>/<identity>.wav` once they have been silent long enough
pub struct SpeakerRecorder {
    shared: Arc<RecorderShared>,
}

impl SpeakerRecorder {
    pub fn new(config: RecorderConfig, identities: SourceIdentities) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).context("Failed to create output directory")?;

        info!(
            "Speaker recorder initialized: {} (silence threshold {:?})",
            config.output_dir.display(),
            config.silence_threshold
        );

        Ok(Self {
            shared: Arc::new(RecorderShared {
                flushes: Mutex::new(FlushLog::new(config.max_flush_reports)),
                config,
                identities,
                buffers: SpeakerBuffers::default(),
                failed_flushes: Mutex::new(0),
            }),
        })
    }

    /// Record until the packet stream closes.
    ///
    /// Each source gets its own silence watcher; all watchers are cancelled
    /// when the stream closes and any audio still buffered is flushed.
    pub async fn record(&self, mut packets: mpsc::Receiver<DecodedPacket>) -> Result<RecordingSummary> {
        let recording_id = Uuid::new_v4();
        let cancel_token = CancellationToken::new();
        let mut watchers = JoinSet::new();
        let mut packet_count = 0u64;
        let mut sources = std::collections::HashSet::new();

        info!("Starting per-speaker recording {}", recording_id);

        while let Some(packet) = packets.recv().await {
            packet_count += 1;
            sources.insert(packet.ssrc);

            if self.shared.buffers.append(packet.ssrc, &packet.pcm) {
                debug!("Watching source {} for silence", packet.ssrc);
                watchers.spawn(watch_source(
                    Arc::clone(&self.shared),
                    packet.ssrc,
                    cancel_token.clone(),
                ));
            }

            while let Some(joined) = watchers.try_join_next() {
                if let Err(e) = joined {
                    error!("Silence watcher failed: {}", e);
                }
            }
        }

        cancel_token.cancel();
        while let Some(joined) = watchers.join_next().await {
            if let Err(e) = joined {
                error!("Silence watcher failed: {}", e);
            }
        }

        for (ssrc, entry) in self.shared.buffers.drain() {
            let samples = std::mem::take(&mut lock(&entry).samples);
            if !samples.is_empty() {
                self.shared.flush(ssrc, samples, FlushReason::Shutdown);
            }
        }

        let flushes = std::mem::replace(
            &mut *self
                .shared
                .flushes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            FlushLog::new(self.shared.config.max_flush_reports),
        );
        let total_flushes = flushes.total;
        let failed_flushes = *self
            .shared
            .failed_flushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        info!(
            "Recording {} complete: {} packets, {} sources, {} files written, {} failed",
            recording_id,
            packet_count,
            sources.len(),
            total_flushes,
            failed_flushes
        );

        Ok(RecordingSummary {
            recording_id,
            packets: packet_count,
            sources: sources.len(),
            flushes: flushes.recent.into(),
            total_flushes,
            failed_flushes,
            flush_counts: flushes.counts,
        })
    }
}

/// Wake every silence threshold; flush the source's buffer once it has been
/// quiet for at least the threshold
async fn watch_source(shared: Arc<RecorderShared>, ssrc: u32, cancel_token: CancellationToken) {
    let threshold = shared.config.silence_threshold;
    let eviction_timeout = shared.config.eviction_timeout();

    let Some(entry) = shared.buffers.get(ssrc) else {
        return;
    };

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(threshold) => {}
        }

        let samples = {
            let mut buffer = lock(&entry);
            if buffer.last_packet.elapsed() < threshold {
                continue;
            }
            if buffer.samples.is_empty() {
                None
            } else {
                buffer.last_packet = Instant::now();
                Some(std::mem::take(&mut buffer.samples))
            }
        };

        match samples {
            Some(samples) => shared.flush(ssrc, samples, FlushReason::Silence),
            None => {
                if !eviction_timeout.is_zero()
                    && shared.buffers.evict_if_idle(ssrc, &entry, eviction_timeout)
                {
                    debug!("Source {} idle, dropping its buffer", ssrc);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_reports_new_sources_once() {
        let buffers = SpeakerBuffers::default();
        assert!(buffers.append(1, &[1, 2]));
        assert!(!buffers.append(1, &[3, 4]));
        assert!(buffers.append(2, &[5, 6]));

        let entry = buffers.get(1).unwrap();
        assert_eq!(lock(&entry).samples, vec![1, 2, 3, 4]);
    }

    fn report(ssrc: u32, reason: FlushReason) -> FlushReport {
        FlushReport {
            ssrc,
            identity: format!("ssrc-{}", ssrc),
            path: PathBuf::from(format!("ssrc-{}.wav", ssrc)),
            samples: 1920,
            reason,
            flushed_at: Utc::now(),
        }
    }

    #[test]
    fn test_flush_log_keeps_latest_reports_and_all_counts() {
        let mut log = FlushLog::new(3);
        for _ in 0..10 {
            log.push(report(1, FlushReason::Silence));
        }
        log.push(report(2, FlushReason::Shutdown));

        assert_eq!(log.recent.len(), 3);
        assert_eq!(log.total, 11);
        assert_eq!(log.counts[&(1, FlushReason::Silence)], 10);
        assert_eq!(log.recent.back().map(|r| r.ssrc), Some(2));
    }

    #[test]
    fn test_flush_log_with_no_capacity_only_counts() {
        let mut log = FlushLog::new(0);
        log.push(report(4, FlushReason::Silence));

        assert!(log.recent.is_empty());
        assert_eq!(log.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_source_starts_fresh() {
        let buffers = SpeakerBuffers::default();
        buffers.append(9, &[1]);

        let entry = buffers.get(9).unwrap();
        lock(&entry).samples.clear();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(buffers.evict_if_idle(9, &entry, Duration::from_secs(2)));
        assert!(buffers.append(9, &[2]));
        assert_eq!(lock(&buffers.get(9).unwrap()).samples, vec![2]);
    }
}

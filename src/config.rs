use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::DecoderCommand;
use crate::recording::{RecorderConfig, RecordingOptions};
use crate::session::SessionConfig;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3140,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Wire codec ("pcm", or "opus" with the `opus` feature)
    pub codec: String,
    pub disconnect_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub join_attempts: u32,
    pub join_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub handoff_depth: usize,
    pub decoder: DecoderCommand,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            codec: "pcm".to_string(),
            disconnect_timeout_secs: defaults.disconnect_timeout.as_secs(),
            watchdog_interval_secs: defaults.watchdog_interval.as_secs(),
            monitor_interval_secs: defaults.monitor_interval.as_secs(),
            join_attempts: defaults.join_attempts,
            join_delay_ms: defaults.join_delay.as_millis() as u64,
            settle_delay_ms: defaults.settle_delay.as_millis() as u64,
            handoff_depth: defaults.handoff_depth,
            decoder: defaults.decoder,
        }
    }
}

impl VoiceConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            disconnect_timeout: Duration::from_secs(self.disconnect_timeout_secs),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_secs),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            join_attempts: self.join_attempts,
            join_delay: Duration::from_millis(self.join_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            handoff_depth: self.handoff_depth,
            decoder: self.decoder.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: String,
    pub silence_threshold_ms: u64,
    pub evict_after_intervals: u32,
    pub max_flush_reports: usize,
    pub queue_depth: usize,
    pub settle_delay_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: "recordings".to_string(),
            silence_threshold_ms: 1000,
            evict_after_intervals: 4,
            max_flush_reports: 1000,
            queue_depth: 100,
            settle_delay_ms: 1000,
        }
    }
}

impl RecordingConfig {
    /// Recording options, optionally overriding the output dir and threshold
    pub fn options(
        &self,
        output_dir: Option<PathBuf>,
        silence_threshold: Option<Duration>,
    ) -> RecordingOptions {
        let mut recorder = RecorderConfig::new(
            output_dir.unwrap_or_else(|| PathBuf::from(&self.output_dir)),
            silence_threshold.unwrap_or(Duration::from_millis(self.silence_threshold_ms)),
        );
        recorder.evict_after_intervals = self.evict_after_intervals;
        recorder.max_flush_reports = self.max_flush_reports;

        RecordingOptions {
            recorder,
            queue_depth: self.queue_depth,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}

impl Config {
    /// Load from an optional config file, then `LOQA_VOICE__*` environment
    /// variables (e.g. `LOQA_VOICE__VOICE__CODEC=opus`)
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_VOICE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

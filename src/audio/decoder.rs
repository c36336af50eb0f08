use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::frame::{self, CHANNELS, SAMPLE_RATE};

/// Placeholder replaced by the input file path in decoder arguments
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// External command that decodes a file to raw s16le interleaved PCM on stdout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for DecoderCommand {
    fn default() -> Self {
        let sample_rate = SAMPLE_RATE.to_string();
        let channels = CHANNELS.to_string();
        Self {
            program: "ffmpeg".to_string(),
            args: [
                "-i",
                INPUT_PLACEHOLDER,
                "-f",
                "s16le",
                "-ar",
                &sample_rate,
                "-ac",
                &channels,
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl DecoderCommand {
    /// Arguments with the input placeholder substituted
    pub fn args_for(&self, input: &Path) -> Vec<String> {
        let input = input.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &input))
            .collect()
    }
}

/// A running decode process and its buffered stdout.
///
/// The child is killed when this value is dropped, so every exit path of a
/// playback tears the process down.
pub struct DecodeProcess {
    child: Child,
    reader: BufReader<ChildStdout>,
}

impl DecodeProcess {
    pub fn spawn(command: &DecoderCommand, input: &Path) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(command.args_for(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("error starting decoder process {}", command.program))?;

        let stdout = child
            .stdout
            .take()
            .context("error creating decoder stdout pipe")?;

        info!(
            "Decoder started: {} (pid {:?}) for {}",
            command.program,
            child.id(),
            input.display()
        );

        Ok(Self {
            child,
            reader: BufReader::with_capacity(16384, stdout),
        })
    }

    /// OS process id, if the process has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Read the next full frame; `None` at end of stream
    pub async fn read_frame(&mut self) -> Result<Option<Vec<i16>>> {
        frame::read_frame(&mut self.reader)
            .await
            .context("error reading from decoder output")
    }

    /// Kill the process and wait for it to exit
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill decoder process: {}", e);
        } else {
            debug!("Decoder process killed");
        }
    }
}

//! Outbound playback: decode a file, encode frames, send them to a session

mod controller;
mod sender;

pub use controller::PlaybackController;
pub use sender::{send_pcm, SenderStats};

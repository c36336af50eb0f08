//! Voice session state
//!
//! This module provides:
//! - `SessionRegistry`: session key → `Session`, created lazily
//! - `Session`: playback lock, Player control block and playback status
//! - `Player`: pause/resume/stop control for the running playback
//! - `DisconnectWatchdog`: leaves voice after an idle timeout

mod config;
mod player;
mod registry;
#[allow(clippy::module_inception)]
mod session;
mod stats;
mod watchdog;

pub use config::SessionConfig;
pub use player::{Player, PlayerState};
pub use registry::SessionRegistry;
pub use session::{PlaybackGuard, Session};
pub use stats::SessionStatus;
pub use watchdog::DisconnectWatchdog;

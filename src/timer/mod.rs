//! Round countdown and progression

pub mod cue;
pub mod service;

pub use cue::{AudioCue, Cue, LoggedCue};
pub use service::RoundTimerService;

/// Render a countdown as `MM:SS` for the overlay
pub fn format_timer(total_secs: u64) -> String {
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

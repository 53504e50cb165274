//! Audio cues fired by the round timer

/// The three sounds a bout needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Bell at the top of a round
    RoundStart,
    /// Bell at the end of a round
    RoundEnd,
    /// Sticks with ten seconds left in the round
    Warning,
}

/// Playback seam so deployments can route cues to whatever audio path the
/// venue has. Implementations must not block the timer.
pub trait AudioCue: Send + Sync {
    fn play(&self, cue: Cue);
}

/// Cue sink that only logs, for headless runs and tests
pub struct LoggedCue;

impl AudioCue for LoggedCue {
    fn play(&self, cue: Cue) {
        match cue {
            Cue::RoundStart => tracing::info!("cue: round start bell"),
            Cue::RoundEnd => tracing::info!("cue: round end bell"),
            Cue::Warning => tracing::info!("cue: ten-second warning"),
        }
    }
}

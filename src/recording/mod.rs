//! Recording control and post-round staging

pub mod orchestrator;
pub mod staging;

use std::time::Duration;

use async_trait::async_trait;

use crate::state::record::RoundRecord;

pub use orchestrator::RecordingOrchestrator;
pub use staging::{derive_fight_id, output_filename, NullStager, RoundMeta, Stager};

/// Recording-side hooks driven by the round timer
///
/// Every method is best-effort: implementations log their own failures and
/// never surface them, so the clock keeps running when the recording backend
/// degrades.
#[async_trait]
pub trait RoundRecorder: Send + Sync {
    /// A bout was armed and the overlay should reset
    async fn bout_armed(&self) {}

    /// A round just went active
    async fn round_started(&self, _round: u32) {}

    /// A round just finished; `record` is the snapshot taken at the bell
    async fn round_ended(&self, _record: &RoundRecord) {}

    async fn recording_paused(&self) {}

    async fn recording_resumed(&self) {}

    /// Once-per-second countdown update while a round or rest is running
    async fn overlay_tick(&self, _remaining: Duration, _round: u32) {}
}

/// Recorder for timer-only setups with no recording backend
pub struct DisabledRecorder;

#[async_trait]
impl RoundRecorder for DisabledRecorder {}

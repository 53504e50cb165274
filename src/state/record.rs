//! Round record data model
//!
//! Defines the round lifecycle states, the persisted round record, and the
//! overlay projection consumed by on-screen renderers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a bout's current round
///
/// Legal progression is `Waiting -> Active -> (Resting -> Active)* -> Ended`,
/// with `Paused` reachable from, and returning to, `Active`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoundState {
    /// Armed but not yet started
    #[default]
    Waiting,
    /// A round is in progress
    Active,
    /// Between rounds
    Resting,
    /// Countdown frozen, resumable
    Paused,
    /// Bout finished
    Ended,
}

impl RoundState {
    /// Public-facing label for overlay display
    pub fn overlay_label(self) -> &'static str {
        match self {
            RoundState::Waiting => "READY",
            RoundState::Active => "ACTIVE",
            RoundState::Resting => "RESTING",
            RoundState::Paused => "PAUSED",
            RoundState::Ended => "ENDED",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundState::Waiting => "WAITING",
            RoundState::Active => "ACTIVE",
            RoundState::Resting => "RESTING",
            RoundState::Paused => "PAUSED",
            RoundState::Ended => "ENDED",
        };
        f.write_str(name)
    }
}

/// The persisted state of one bout's current round
///
/// This is the single source of truth shared across processes. `start_time`
/// is only present once a round or rest period has actually begun; while the
/// bout is armed but not started the field is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Current lifecycle state
    pub state: RoundState,

    /// Current round number (1-indexed)
    pub round: u32,

    /// Total rounds in the bout
    pub total_rounds: u32,

    /// Round duration in seconds
    pub duration: u64,

    /// Rest duration in seconds
    pub rest: u64,

    /// Seconds left in the current phase; tracked while paused or resting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u64>,

    /// ISO-8601 timestamp of when the current phase began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// Append-only map of state -> ISO-8601 timestamp of first entry
    #[serde(default)]
    pub timestamps: BTreeMap<RoundState, String>,
}

impl RoundRecord {
    /// Create a freshly armed record for a new bout
    ///
    /// The record starts in `Waiting` with a single `WAITING` timestamp and
    /// no `start_time`.
    pub fn armed(total_rounds: u32, duration_s: u64, rest_s: u64) -> Self {
        let mut timestamps = BTreeMap::new();
        timestamps.insert(RoundState::Waiting, now_iso());
        Self {
            state: RoundState::Waiting,
            round: 1,
            total_rounds: total_rounds.max(1),
            duration: duration_s,
            rest: rest_s,
            remaining_time: None,
            start_time: None,
            timestamps,
        }
    }

    /// Fallback record used when no persisted state exists
    pub fn fresh() -> Self {
        Self::armed(1, 0, 0)
    }

    /// Derived read-only projection for overlay consumers
    pub fn overlay(&self) -> OverlayState {
        OverlayState {
            status: self.state.overlay_label().to_string(),
            round: self.round,
        }
    }

    /// Whether the finishing round is the last of the bout
    pub fn is_final_round(&self) -> bool {
        self.round >= self.total_rounds
    }
}

impl Default for RoundRecord {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Public-facing projection of the round record
///
/// Recomputed on every read from the source state; never stored
/// independently so it cannot diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub status: String,
    pub round: u32,
}

/// Current wall-clock time as an ISO-8601 string
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armed_record_omits_start_time() {
        let record = RoundRecord::armed(3, 120, 60);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["state"], "WAITING");
        assert_eq!(json["round"], 1);
        assert_eq!(json["total_rounds"], 3);
        assert_eq!(json["duration"], 120);
        assert_eq!(json["rest"], 60);
        assert!(json.get("start_time").is_none());
        assert!(json.get("remaining_time").is_none());
        assert!(json["timestamps"]["WAITING"].is_string());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut record = RoundRecord::armed(5, 180, 60);
        record.state = RoundState::Resting;
        record.round = 2;
        record.remaining_time = Some(45);
        record.start_time = Some(now_iso());
        record.timestamps.insert(RoundState::Active, now_iso());
        record.timestamps.insert(RoundState::Resting, now_iso());

        let json = serde_json::to_string(&record).unwrap();
        let back: RoundRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_overlay_projection_labels() {
        let mut record = RoundRecord::armed(3, 120, 60);
        assert_eq!(record.overlay().status, "READY");

        record.state = RoundState::Active;
        record.round = 2;
        let overlay = record.overlay();
        assert_eq!(overlay.status, "ACTIVE");
        assert_eq!(overlay.round, 2);

        record.state = RoundState::Ended;
        assert_eq!(record.overlay().status, "ENDED");
    }

    #[test]
    fn test_armed_clamps_zero_rounds() {
        let record = RoundRecord::armed(0, 60, 30);
        assert_eq!(record.total_rounds, 1);
    }

    #[test]
    fn test_final_round() {
        let mut record = RoundRecord::armed(3, 120, 60);
        assert!(!record.is_final_round());
        record.round = 3;
        assert!(record.is_final_round());
    }
}

//! Round state machine
//!
//! Owns the persisted round record and validates every transition before
//! anything touches disk. Writes are atomic (write-then-rename) and skipped
//! entirely when the new record matches the last one written, so concurrent
//! readers observe a stable mtime for no-op updates.

use std::fs;
use std::path::{Path, PathBuf};

use crate::state::record::{now_iso, OverlayState, RoundRecord, RoundState};
use crate::utils::error::{TransitionError, TransitionResult};

/// Validates and persists transitions of the round record
///
/// The state machine is the only writer of the record file; the timer
/// service and administrative commands go through it. Readers (overlay,
/// heart-rate daemon, web API) consume the file directly.
pub struct RoundStateMachine {
    path: PathBuf,
    record: RoundRecord,
    last_written: Option<String>,
}

impl RoundStateMachine {
    /// Load the persisted record, or start fresh
    ///
    /// A missing or corrupt file yields a fresh record in `Waiting` with a
    /// single `WAITING` timestamp. Never fails; persistence problems during
    /// the initial write are logged and deferred to the next transition.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match read_record(&path) {
            Some(record) => {
                let last_written = serde_json::to_string_pretty(&record).ok();
                Self {
                    path,
                    record,
                    last_written,
                }
            }
            None => {
                let mut machine = Self {
                    path,
                    record: RoundRecord::fresh(),
                    last_written: None,
                };
                if let Err(err) = machine.persist() {
                    tracing::warn!("could not initialise round record: {err}");
                }
                machine
            }
        }
    }

    /// The current in-memory record
    pub fn record(&self) -> &RoundRecord {
        &self.record
    }

    /// Location of the persisted record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overlay projection of the current record
    pub fn overlay(&self) -> OverlayState {
        self.record.overlay()
    }

    /// Arm a new bout, overwriting the previous record wholesale
    ///
    /// This is the explicit re-arm path: it is the only way back to
    /// `Waiting` and resets round number, durations and timestamps.
    pub fn arm(&mut self, total_rounds: u32, duration_s: u64, rest_s: u64) -> TransitionResult<()> {
        self.record = RoundRecord::armed(total_rounds, duration_s, rest_s);
        tracing::info!(
            total_rounds = self.record.total_rounds,
            duration_s,
            rest_s,
            "round record armed"
        );
        self.persist()
    }

    /// Apply a validated state transition and persist it
    ///
    /// Transitioning to the current state is a no-op. An illegal move is
    /// reported without touching the file.
    pub fn transition(&mut self, target: RoundState) -> TransitionResult<()> {
        if target == self.record.state {
            return Ok(());
        }
        self.check(target)?;
        self.apply(target)
    }

    /// Freeze into `Paused`, storing the remaining time in the same write
    pub fn pause_with_remaining(&mut self, remaining_s: u64) -> TransitionResult<()> {
        if self.record.state == RoundState::Paused {
            return Ok(());
        }
        self.check(RoundState::Paused)?;
        self.record.remaining_time = Some(remaining_s);
        self.apply(RoundState::Paused)
    }

    /// Advance into the next round's `Active` phase in a single write
    ///
    /// Increments the round number; fails if the bout has no rounds left.
    pub fn begin_next_round(&mut self) -> TransitionResult<()> {
        self.check(RoundState::Active)?;
        if self.record.round + 1 > self.record.total_rounds {
            return Err(TransitionError::RoundsExhausted {
                round: self.record.round,
                total_rounds: self.record.total_rounds,
            });
        }
        self.record.round += 1;
        self.apply(RoundState::Active)
    }

    /// Persist the remaining seconds of the current phase
    pub fn set_remaining(&mut self, remaining_s: u64) -> TransitionResult<()> {
        self.record.remaining_time = Some(remaining_s);
        self.persist()
    }

    /// Update the configured round and rest durations
    pub fn set_durations(&mut self, duration_s: u64, rest_s: u64) -> TransitionResult<()> {
        self.record.duration = duration_s;
        self.record.rest = rest_s;
        self.persist()
    }

    /// Re-read the record from disk, picking up external overwrites
    ///
    /// Used by the rest-phase poll so an out-of-band reset aborts the rest
    /// countdown. A missing or corrupt file reads as a fresh record but is
    /// not written back.
    pub fn refresh(&mut self) {
        self.record = read_record(&self.path).unwrap_or_else(RoundRecord::fresh);
        self.last_written = serde_json::to_string_pretty(&self.record).ok();
    }

    fn check(&self, target: RoundState) -> TransitionResult<()> {
        let current = self.record.state;
        let legal = match target {
            // Ended is reachable from every state.
            RoundState::Ended => true,
            RoundState::Active => matches!(
                current,
                RoundState::Waiting | RoundState::Resting | RoundState::Paused
            ),
            RoundState::Resting | RoundState::Paused => current == RoundState::Active,
            // Waiting is only reachable through an explicit re-arm.
            RoundState::Waiting => false,
        };
        if legal {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                current,
                attempted: target,
            })
        }
    }

    /// Mutate into `target` and persist; validation must already have passed
    fn apply(&mut self, target: RoundState) -> TransitionResult<()> {
        self.record.state = target;
        self.record.timestamps.insert(target, now_iso());
        match target {
            RoundState::Active => {
                self.record.start_time = Some(now_iso());
                self.record.remaining_time = None;
            }
            RoundState::Resting | RoundState::Ended => {
                self.record.start_time = Some(now_iso());
            }
            RoundState::Paused | RoundState::Waiting => {}
        }
        tracing::info!(state = %target, round = self.record.round, "round state transition");
        self.persist()
    }

    /// Atomically replace the record file if the content changed
    fn persist(&mut self) -> TransitionResult<()> {
        let json = serde_json::to_string_pretty(&self.record)?;
        if self.last_written.as_deref() == Some(json.as_str()) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        self.last_written = Some(json);
        Ok(())
    }
}

/// Read and parse the record file, if possible
fn read_record(path: &Path) -> Option<RoundRecord> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!("ignoring corrupt round record at {}: {err}", path.display());
            None
        }
    }
}

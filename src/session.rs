//! Per-corner session storage
//!
//! Each round gets a fresh directory per corner where collaborators (the
//! heart-rate daemon, taggers) append their data. The timer creates these
//! directories when a round begins; everything written into them belongs to
//! external tooling.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::state::record::RoundRecord;

/// One of the two competitors in a bout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    Red,
    Blue,
}

impl Corner {
    pub const ALL: [Corner; 2] = [Corner::Red, Corner::Blue];

    pub fn as_str(self) -> &'static str {
        match self {
            Corner::Red => "red",
            Corner::Blue => "blue",
        }
    }
}

/// Creates and resolves per-corner round directories
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for one corner's data in one round
    pub fn round_dir(&self, corner: Corner, round: u32) -> PathBuf {
        self.root.join(corner.as_str()).join(format!("round_{round}"))
    }

    /// Create fresh session storage for both corners
    ///
    /// The heart-rate log is truncated so the new round starts clean even
    /// when a round number is reused after a re-arm.
    pub fn create_round_dirs(&self, round: u32) -> std::io::Result<()> {
        for corner in Corner::ALL {
            let dir = self.round_dir(corner, round);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("hr_log.csv"), "")?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Post-fight summary seam, invoked once the bout has ended
///
/// Generation happens on a detached task; failures are logged and never
/// block or undo the `Ended` transition.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn bout_ended(&self, record: RoundRecord) -> anyhow::Result<()>;
}

/// Summary sink for setups without post-fight reporting
pub struct NullSummary;

#[async_trait]
impl SummarySink for NullSummary {
    async fn bout_ended(&self, record: RoundRecord) -> anyhow::Result<()> {
        tracing::debug!(rounds = record.round, "bout ended; no summary sink configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_round_dirs_for_both_corners() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.create_round_dirs(1).unwrap();
        for corner in Corner::ALL {
            let round_dir = store.round_dir(corner, 1);
            assert!(round_dir.is_dir());
            assert!(round_dir.join("hr_log.csv").is_file());
        }
    }

    #[test]
    fn test_create_round_dirs_truncates_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.create_round_dirs(2).unwrap();
        let log = store.round_dir(Corner::Red, 2).join("hr_log.csv");
        fs::write(&log, "stale data").unwrap();

        store.create_round_dirs(2).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "");
    }
}

//! Finished-recording hand-off
//!
//! When a round ends, its metadata is handed to an external file-stager
//! that moves the backend's output files into their final archive layout.
//! The hand-off runs as a detached task so the round-end critical path is
//! never delayed by slow file I/O.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata describing one finished round's recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMeta {
    pub fight_id: String,
    pub round_no: u32,
    pub red_name: String,
    pub blue_name: String,
    /// Fight date, `YYYY-MM-DD`
    pub date: String,
    /// ISO-8601 round start, if the round was observed starting
    pub start: Option<String>,
    /// ISO-8601 round end
    pub end: String,
    /// Which corner each output's file belongs to, for archive layout
    #[serde(default)]
    pub output_to_corner: BTreeMap<String, String>,
}

/// External file-stager seam
///
/// Implementations move finished recordings into the archive; failures are
/// captured by the orchestrator's detached task and logged, never
/// propagated into round progression.
#[async_trait]
pub trait Stager: Send + Sync {
    async fn stage_round(&self, meta: RoundMeta) -> anyhow::Result<()>;
}

/// Stager for setups without an archive step
pub struct NullStager;

#[async_trait]
impl Stager for NullStager {
    async fn stage_round(&self, meta: RoundMeta) -> anyhow::Result<()> {
        tracing::debug!(fight_id = %meta.fight_id, round_no = meta.round_no, "no stager configured");
        Ok(())
    }
}

/// Fight id fallback derived from corner names and date
pub fn derive_fight_id(red_name: &str, blue_name: &str, date: &str) -> String {
    format!(
        "{}_vs_{}_{}",
        safe_filename(red_name),
        safe_filename(blue_name),
        date
    )
}

/// Standard filename for an output recording: `B<bb>_R<rr>_<camera><ext>`
pub fn output_filename(bout: u32, round_no: u32, camera: &str, ext: &str) -> String {
    let mut camera = safe_filename(camera);
    if camera.is_empty() {
        camera = "unnamed".into();
    }
    let ext = if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    };
    format!("B{bout:02}_R{round_no:02}_{camera}{ext}")
}

/// Replace disallowed filename characters with underscores
///
/// Runs of anything outside `[A-Za-z0-9._-]` collapse into a single
/// underscore, mirroring the archive layout's naming rules.
pub fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sub = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_filename_zero_pads() {
        assert_eq!(output_filename(1, 3, "red cam", ".mkv"), "B01_R03_red_cam.mkv");
        assert_eq!(output_filename(12, 10, "main", "mp4"), "B12_R10_main.mp4");
    }

    #[test]
    fn test_output_filename_handles_empty_camera() {
        assert_eq!(output_filename(1, 1, "", ".mkv"), "B01_R01_unnamed.mkv");
    }

    #[test]
    fn test_safe_filename_collapses_runs() {
        assert_eq!(safe_filename("Red / Fighter!"), "Red_Fighter_");
        assert_eq!(safe_filename("blue-cam_2.raw"), "blue-cam_2.raw");
    }

    #[test]
    fn test_derive_fight_id() {
        assert_eq!(
            derive_fight_id("Jo Smith", "A. Jones", "2026-08-30"),
            "Jo_Smith_vs_A._Jones_2026-08-30"
        );
    }
}

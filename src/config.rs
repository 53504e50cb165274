//! Configuration
//!
//! Connection settings for the recording backend plus the per-bout output
//! and corner wiring. Loaded from a JSON file; a missing or invalid file
//! falls back to defaults with a warning so the timer can still run without
//! a recording backend configured.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection parameters for the recording protocol client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Bounds every individual network operation (connect, send, receive)
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4455,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Full recording configuration for a bout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Recording backend host
    pub host: String,

    /// Recording backend port
    pub port: u16,

    /// Optional backend password for the handshake challenge
    pub password: Option<String>,

    /// Per-call network timeout in milliseconds
    pub timeout_ms: u64,

    /// Named outputs started/stopped at round boundaries
    pub outputs: Vec<String>,

    /// Which corner each output belongs to, for staging
    pub output_to_corner: BTreeMap<String, String>,

    /// Per-camera source-record ids, keyed by camera name
    pub source_records: BTreeMap<String, i64>,

    /// Delay after issuing recording starts, covering encoder spin-up
    pub warmup_ms: u64,

    /// Whether to additionally record the full program stream
    pub record_program: bool,

    /// Red corner display name
    pub red_name: String,

    /// Blue corner display name
    pub blue_name: String,

    /// Explicit fight id; derived from corner names and date when absent
    pub fight_id: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4455,
            password: None,
            timeout_ms: 5_000,
            outputs: Vec::new(),
            output_to_corner: BTreeMap::new(),
            source_records: BTreeMap::new(),
            warmup_ms: 0,
            record_program: false,
            red_name: "Red".into(),
            blue_name: "Blue".into(),
            fight_id: None,
        }
    }
}

impl RecordingConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing or unparseable files yield the defaults; recording is then
    /// effectively disabled but round timing still works.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("recording config not found at {}: {err}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("invalid recording config at {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Per-call network timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Warm-up delay after recording-start calls
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Connection parameters derived from this configuration
    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            timeout: self.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = RecordingConfig::load("/nonexistent/recording.json");
        assert_eq!(config.port, 4455);
        assert!(config.outputs.is_empty());
        assert!(!config.record_program);
    }

    #[test]
    fn test_invalid_json_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        std::fs::write(&path, "not json").unwrap();

        let config = RecordingConfig::load(&path);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        std::fs::write(
            &path,
            r#"{
                "outputs": ["red_cam", "blue_cam"],
                "source_records": {"red_cam": 1, "blue_cam": 2},
                "warmup_ms": 250,
                "record_program": true
            }"#,
        )
        .unwrap();

        let config = RecordingConfig::load(&path);
        assert_eq!(config.outputs, vec!["red_cam", "blue_cam"]);
        assert_eq!(config.source_records.len(), 2);
        assert_eq!(config.warmup(), Duration::from_millis(250));
        assert!(config.record_program);
        // Unspecified fields keep their defaults.
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.red_name, "Red");
    }

    #[test]
    fn test_client_config_derivation() {
        let mut config = RecordingConfig::default();
        config.host = "10.0.0.5".into();
        config.port = 4460;
        config.password = Some("pw".into());
        config.timeout_ms = 750;

        let client = config.client();
        assert_eq!(client.host, "10.0.0.5");
        assert_eq!(client.port, 4460);
        assert_eq!(client.password.as_deref(), Some("pw"));
        assert_eq!(client.timeout, Duration::from_millis(750));
    }
}

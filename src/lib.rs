//! Ringside: round timing and synchronized recording for combat-sports bouts
//!
//! The crate is built around one persisted round record per bout. The round
//! state machine owns that record; the timer service drives it through the
//! bout's rounds and rest periods on a background task; the recording
//! orchestrator mirrors every round into a remote recording backend over a
//! persistent JSON connection. The pieces connect through small traits
//! (`RoundRecorder`, `Stager`, `AudioCue`, `SummarySink`) so any of them can
//! run standalone.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod protocol;
pub mod recording;
pub mod session;
pub mod state;
pub mod timer;
pub mod utils;

pub use config::{ClientConfig, RecordingConfig};
pub use protocol::client::RecordingClient;
pub use recording::{
    DisabledRecorder, NullStager, RecordingOrchestrator, RoundMeta, RoundRecorder, Stager,
};
pub use session::{Corner, NullSummary, SessionStore, SummarySink};
pub use state::machine::RoundStateMachine;
pub use state::record::{OverlayState, RoundRecord, RoundState};
pub use timer::{AudioCue, Cue, LoggedCue, RoundTimerService};
pub use utils::error::{ProtocolError, TransitionError};

/// Initialize tracing/logging for binaries embedding the crate
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringside=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    //! Full-stack scenario: timer, orchestrator, and fake backend together.

    use std::sync::Arc;
    use std::time::Duration;

    use crate::protocol::testing::{BackendOptions, FakeBackend};
    use crate::timer::service::RoundTimerService;
    use crate::{
        LoggedCue, NullStager, NullSummary, RecordingClient, RecordingConfig,
        RecordingOrchestrator, RoundState, RoundStateMachine, SessionStore,
    };

    async fn wait_for_state(service: &RoundTimerService, state: RoundState) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while service.record().state != state {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("bout never reached {state}"));
    }

    #[tokio::test]
    async fn test_two_round_bout_drives_the_backend() {
        let backend = FakeBackend::spawn(BackendOptions::default()).await;
        let mut config = RecordingConfig::default();
        config.port = backend.port();
        config.outputs = vec!["red_cam".into()];
        config.record_program = true;

        let dir = tempfile::tempdir().unwrap();
        let client = RecordingClient::new(config.client());
        let orchestrator =
            RecordingOrchestrator::new(client.clone(), config, Arc::new(NullStager));
        let service = RoundTimerService::new(
            RoundStateMachine::load(dir.path().join("round_state.json")),
            Arc::new(orchestrator),
            Arc::new(LoggedCue),
            Arc::new(NullSummary),
            SessionStore::new(dir.path().join("sessions")),
        );

        service.arm(2, 1, 1).await.unwrap();
        service.start(1, 1).await.unwrap();
        wait_for_state(&service, RoundState::Ended).await;
        client.close().await;

        let types = backend.request_types();
        let count = |t: &str| types.iter().filter(|x| *x == t).count();
        // one browser refresh from arming, one start/stop pair per round
        assert_eq!(count("PressInputPropertiesButton"), 1);
        assert_eq!(count("StartRecord"), 2);
        assert_eq!(count("StopRecord"), 2);
        assert_eq!(count("StartOutput"), 2);
        assert_eq!(count("StopOutput"), 2);
        // the worker pushed countdown text while rounds were running
        assert!(count("SetInputSettings") > 0);

        let record = service.record();
        assert_eq!(record.round, 2);
        assert!(record.timestamps.contains_key(&RoundState::Ended));
    }
}

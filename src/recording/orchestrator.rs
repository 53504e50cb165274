//! Fan-out between timer events and the recording backend
//!
//! The orchestrator turns one round event into the full set of backend
//! requests: the optional program recording, one `StartOutput`/`StopOutput`
//! per configured camera output, and one vendor request per source-record
//! filter. Every request is best-effort; a camera that is already rolling or
//! a backend that is down produces a log line, never a failed round.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::config::RecordingConfig;
use crate::protocol::client::RecordingClient;
use crate::recording::staging::{derive_fight_id, RoundMeta, Stager};
use crate::recording::RoundRecorder;
use crate::state::record::{now_iso, RoundRecord};
use crate::timer::format_timer;

/// Overlay input names on the backend scene
const TIMER_INPUT: &str = "Timer";
const ROUND_INPUT: &str = "RoundBadge";
const OVERLAY_BROWSER_INPUT: &str = "overlay";

pub struct RecordingOrchestrator {
    client: RecordingClient,
    config: RecordingConfig,
    stager: Arc<dyn Stager>,
}

impl RecordingOrchestrator {
    pub fn new(client: RecordingClient, config: RecordingConfig, stager: Arc<dyn Stager>) -> Self {
        Self {
            client,
            config,
            stager,
        }
    }

    /// Start the program recording, wait out the warmup, then start every
    /// configured output and source-record filter concurrently.
    pub async fn round_start(&self) {
        if self.config.record_program {
            match self.client.start_record().await {
                Ok(resp) if resp.is_effectively_ok() => tracing::info!("program recording started"),
                Ok(resp) => tracing::error!(
                    comment = resp.request_status.comment_or_default(),
                    "could not start program recording"
                ),
                Err(err) => tracing::error!("could not start program recording: {err}"),
            }
        }

        let warmup = self.config.warmup();
        if !warmup.is_zero() {
            tokio::time::sleep(warmup).await;
        }

        let mut tasks = JoinSet::new();
        for name in &self.config.outputs {
            let client = self.client.clone();
            let name = name.clone();
            tasks.spawn(async move { toggle_output(&client, &name, true).await });
        }
        for (camera, id) in &self.config.source_records {
            let client = self.client.clone();
            let camera = camera.clone();
            let id = *id;
            tasks.spawn(async move { toggle_source_record(&client, &camera, id, true).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Stop everything started for the round and hand the capture off to the
    /// stager on a detached task.
    pub async fn round_end(&self, record: &RoundRecord) {
        let mut tasks = JoinSet::new();
        for name in &self.config.outputs {
            let client = self.client.clone();
            let name = name.clone();
            tasks.spawn(async move { toggle_output(&client, &name, false).await });
        }
        for (camera, id) in &self.config.source_records {
            let client = self.client.clone();
            let camera = camera.clone();
            let id = *id;
            tasks.spawn(async move { toggle_source_record(&client, &camera, id, false).await });
        }
        while tasks.join_next().await.is_some() {}

        if self.config.record_program {
            match self.client.stop_record().await {
                Ok(resp) if resp.is_effectively_ok() => tracing::info!("program recording stopped"),
                Ok(resp) => tracing::error!(
                    comment = resp.request_status.comment_or_default(),
                    "could not stop program recording"
                ),
                Err(err) => tracing::error!("could not stop program recording: {err}"),
            }
        }

        let meta = self.round_meta(record);
        let stager = Arc::clone(&self.stager);
        tokio::spawn(async move {
            let fight_id = meta.fight_id.clone();
            let round_no = meta.round_no;
            if let Err(err) = stager.stage_round(meta).await {
                tracing::error!(fight_id, round_no, "round staging failed: {err}");
            }
        });
    }

    pub async fn pause(&self) {
        if let Err(err) = self.client.pause_record().await {
            tracing::warn!("could not pause program recording: {err}");
        }
    }

    pub async fn resume(&self) {
        if let Err(err) = self.client.resume_record().await {
            tracing::warn!("could not resume program recording: {err}");
        }
    }

    /// Push the countdown and round number to the overlay text inputs
    pub async fn push_timer(&self, remaining: Duration, round: u32) {
        let timer_text = format_timer(remaining.as_secs());
        let round_text = round.to_string();
        let (timer, badge) = tokio::join!(
            self.client.set_text(TIMER_INPUT, &timer_text),
            self.client.set_text(ROUND_INPUT, &round_text),
        );
        for err in [timer.err(), badge.err()].into_iter().flatten() {
            tracing::debug!("overlay text push failed: {err}");
        }
    }

    pub async fn refresh_overlay(&self) {
        if let Err(err) = self
            .client
            .refresh_browser_source(OVERLAY_BROWSER_INPUT)
            .await
        {
            tracing::debug!("overlay refresh failed: {err}");
        }
    }

    fn round_meta(&self, record: &RoundRecord) -> RoundMeta {
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let fight_id = self.config.fight_id.clone().unwrap_or_else(|| {
            derive_fight_id(&self.config.red_name, &self.config.blue_name, &date)
        });
        RoundMeta {
            fight_id,
            round_no: record.round,
            red_name: self.config.red_name.clone(),
            blue_name: self.config.blue_name.clone(),
            date,
            start: record.start_time.clone(),
            end: now_iso(),
            output_to_corner: self.config.output_to_corner.clone(),
        }
    }
}

#[async_trait]
impl RoundRecorder for RecordingOrchestrator {
    async fn bout_armed(&self) {
        self.refresh_overlay().await;
    }

    async fn round_started(&self, round: u32) {
        tracing::info!(round, "starting round recording");
        self.round_start().await;
    }

    async fn round_ended(&self, record: &RoundRecord) {
        tracing::info!(round = record.round, "stopping round recording");
        self.round_end(record).await;
    }

    async fn recording_paused(&self) {
        self.pause().await;
    }

    async fn recording_resumed(&self) {
        self.resume().await;
    }

    async fn overlay_tick(&self, remaining: Duration, round: u32) {
        self.push_timer(remaining, round).await;
    }
}

async fn toggle_output(client: &RecordingClient, name: &str, start: bool) {
    let (verb, call) = if start {
        ("start", client.start_output(name).await)
    } else {
        ("stop", client.stop_output(name).await)
    };
    match call {
        Ok(resp) if resp.request_status.result => tracing::info!(output = name, "{verb}ed output"),
        Ok(resp) if resp.request_status.is_soft_state_mismatch() => {
            tracing::warn!(
                output = name,
                comment = resp.request_status.comment_or_default(),
                "output was already in the requested state"
            );
        }
        Ok(resp) => tracing::error!(
            output = name,
            comment = resp.request_status.comment_or_default(),
            "could not {verb} output"
        ),
        Err(err) => tracing::error!(output = name, "could not {verb} output: {err}"),
    }
}

async fn toggle_source_record(client: &RecordingClient, camera: &str, id: i64, start: bool) {
    let (verb, call) = if start {
        ("start", client.start_source_record(id).await)
    } else {
        ("stop", client.stop_source_record(id).await)
    };
    match call {
        Ok(resp) if resp.is_effectively_ok() => {
            tracing::info!(camera, id, "{verb}ed source record");
        }
        Ok(resp) => tracing::error!(
            camera,
            id,
            comment = resp.request_status.comment_or_default(),
            "could not {verb} source record"
        ),
        Err(err) => tracing::error!(camera, id, "could not {verb} source record: {err}"),
    }
}

//! Concurrent round countdown
//!
//! One worker task per bout drives the countdown through every round and
//! rest period. Control calls never block on the worker: they adjust a
//! shared deadline and a pause gate, and the worker picks the change up on
//! its next tick. Time left is always derived from an absolute deadline, so
//! a slow tick never stretches the round.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::recording::RoundRecorder;
use crate::session::{SessionStore, SummarySink};
use crate::state::machine::RoundStateMachine;
use crate::state::record::{OverlayState, RoundRecord, RoundState};
use crate::timer::cue::{AudioCue, Cue};
use crate::utils::error::{TransitionError, TransitionResult};

/// Warning cue fires when this much time is left in a round
const WARNING_LEAD: Duration = Duration::from_secs(10);

/// Worker tick granularity
const TICK: Duration = Duration::from_secs(1);

/// Drives a bout's rounds on a background task
///
/// Cloneable handle; all clones share the one worker and record.
#[derive(Clone)]
pub struct RoundTimerService {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    machine: Mutex<RoundStateMachine>,
    recorder: Arc<dyn RoundRecorder>,
    cue: Arc<dyn AudioCue>,
    summary: Arc<dyn SummarySink>,
    sessions: SessionStore,
    /// Open while the countdown should run; the worker parks when closed
    gate: watch::Sender<bool>,
    clock: Mutex<CountdownClock>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct CountdownClock {
    /// Absolute end of the active countdown; `None` while paused
    deadline: Option<Instant>,
    /// Frozen remainder while paused
    remaining: Duration,
}

impl RoundTimerService {
    pub fn new(
        machine: RoundStateMachine,
        recorder: Arc<dyn RoundRecorder>,
        cue: Arc<dyn AudioCue>,
        summary: Arc<dyn SummarySink>,
        sessions: SessionStore,
    ) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(TimerInner {
                machine: Mutex::new(machine),
                recorder,
                cue,
                summary,
                sessions,
                gate,
                clock: Mutex::new(CountdownClock::default()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the persisted record
    pub fn record(&self) -> RoundRecord {
        self.inner.machine.lock().record().clone()
    }

    pub fn overlay(&self) -> OverlayState {
        self.inner.machine.lock().overlay()
    }

    /// Reset the bout to a freshly armed record
    ///
    /// Any running countdown is abandoned; the next `start` begins round one.
    pub async fn arm(&self, total_rounds: u32, duration_s: u64, rest_s: u64) -> TransitionResult<()> {
        if let Some(handle) = self.inner.worker.lock().take() {
            handle.abort();
        }
        {
            let mut clock = self.inner.clock.lock();
            clock.deadline = None;
            clock.remaining = Duration::ZERO;
        }
        self.inner.gate.send_replace(true);
        self.inner
            .machine
            .lock()
            .arm(total_rounds, duration_s, rest_s)?;
        self.inner.recorder.bout_armed().await;
        Ok(())
    }

    /// Start (or restart) the countdown with `duration_s` seconds remaining
    ///
    /// From `Waiting` this begins round one: session storage is created and
    /// the recorder is notified. From `Paused` it behaves like `resume` with
    /// an explicit remainder. While already running it adjusts the deadline
    /// of the live worker in place. Starting is illegal during a rest period
    /// or once the bout has ended.
    pub async fn start(&self, duration_s: u64, rest_s: u64) -> TransitionResult<()> {
        let (cold_start, round) = {
            let mut machine = self.inner.machine.lock();
            let cold_start = match machine.record().state {
                RoundState::Waiting => true,
                RoundState::Paused | RoundState::Active => false,
                current => {
                    return Err(TransitionError::Illegal {
                        current,
                        attempted: RoundState::Active,
                    })
                }
            };
            machine.set_durations(duration_s, rest_s)?;
            machine.transition(RoundState::Active)?;
            (cold_start, machine.record().round)
        };
        if cold_start {
            if let Err(err) = self.inner.sessions.create_round_dirs(round) {
                tracing::warn!("could not create corner session dirs: {err}");
            }
            self.inner.recorder.round_started(round).await;
        }
        self.launch(Duration::from_secs(duration_s), true);
        Ok(())
    }

    /// Freeze the countdown, persisting the exact remainder
    pub async fn pause(&self) -> TransitionResult<()> {
        {
            let machine = self.inner.machine.lock();
            let current = machine.record().state;
            if current != RoundState::Active {
                return Err(TransitionError::Illegal {
                    current,
                    attempted: RoundState::Paused,
                });
            }
        }
        let remaining = {
            let mut clock = self.inner.clock.lock();
            if let Some(deadline) = clock.deadline.take() {
                clock.remaining = deadline.saturating_duration_since(Instant::now());
            }
            clock.remaining
        };
        self.inner.gate.send_replace(false);
        self.inner
            .machine
            .lock()
            .pause_with_remaining(remaining.as_secs())?;
        self.inner.recorder.recording_paused().await;
        Ok(())
    }

    /// Resume a paused countdown from the remainder stored on disk
    ///
    /// Also recovers an `Active` record left behind by a process restart:
    /// with no live worker the countdown is rebuilt from `remaining_time`
    /// (or a full round if that was never written). No start bell is rung.
    pub async fn resume(&self) -> TransitionResult<()> {
        let remaining = {
            let mut machine = self.inner.machine.lock();
            let record = machine.record();
            let remaining = record.remaining_time.unwrap_or(record.duration);
            match record.state {
                RoundState::Paused => machine.transition(RoundState::Active)?,
                RoundState::Active if !self.worker_alive() => {}
                current => {
                    return Err(TransitionError::Illegal {
                        current,
                        attempted: RoundState::Active,
                    })
                }
            }
            remaining
        };
        self.inner.recorder.recording_resumed().await;
        self.launch(Duration::from_secs(remaining), false);
        Ok(())
    }

    /// End the bout immediately from whatever state it is in
    pub async fn end(&self) -> TransitionResult<()> {
        if let Some(handle) = self.inner.worker.lock().take() {
            handle.abort();
        }
        let record = {
            let mut machine = self.inner.machine.lock();
            machine.transition(RoundState::Ended)?;
            machine.record().clone()
        };
        self.inner.recorder.round_ended(&record).await;
        spawn_summary(&self.inner, record);
        Ok(())
    }

    fn worker_alive(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Open the gate, (re)set the deadline, and make sure a worker is running
    ///
    /// A live worker is adjusted in place; there is never a second worker for
    /// the same bout. The start bell only rings when a worker is spawned.
    fn launch(&self, remaining: Duration, fire_bell: bool) {
        {
            let mut clock = self.inner.clock.lock();
            clock.remaining = remaining;
            clock.deadline = Some(Instant::now() + remaining);
        }
        self.inner.gate.send_replace(true);

        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if fire_bell {
            self.inner.cue.play(Cue::RoundStart);
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(async move { run_worker(inner).await }));
    }
}

/// The per-bout worker: counts the active round down, runs the rest period,
/// and rolls into the next round until the bout ends.
async fn run_worker(inner: Arc<TimerInner>) {
    let mut gate = inner.gate.subscribe();
    'bout: loop {
        // ---- active countdown ----
        let mut warned = false;
        loop {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    return;
                }
            }
            let remaining = {
                let clock = inner.clock.lock();
                match clock.deadline {
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    None => clock.remaining,
                }
            };
            if remaining.is_zero() {
                break;
            }
            if !warned && remaining <= WARNING_LEAD {
                inner.cue.play(Cue::Warning);
                warned = true;
            }
            let round = inner.machine.lock().record().round;
            inner.recorder.overlay_tick(remaining, round).await;
            sleep(remaining.min(TICK)).await;
        }

        inner.cue.play(Cue::RoundEnd);
        let record = inner.machine.lock().record().clone();
        inner.recorder.round_ended(&record).await;

        if record.is_final_round() {
            let ended = {
                let mut machine = inner.machine.lock();
                if let Err(err) = machine.transition(RoundState::Ended) {
                    tracing::error!("could not mark bout ended: {err}");
                }
                machine.record().clone()
            };
            spawn_summary(&inner, ended);
            break;
        }

        // ---- rest period ----
        let rest = Duration::from_secs(record.rest);
        {
            let mut machine = inner.machine.lock();
            if let Err(err) = machine.transition(RoundState::Resting) {
                tracing::error!("could not enter rest period: {err}");
                break;
            }
        }
        let rest_end = Instant::now() + rest;
        loop {
            let remaining = rest_end.saturating_duration_since(Instant::now());
            {
                let mut machine = inner.machine.lock();
                machine.refresh();
                if machine.record().state != RoundState::Resting {
                    // an out-of-band reset owns the record now
                    tracing::info!(
                        state = %machine.record().state,
                        "rest period aborted by external state change"
                    );
                    break 'bout;
                }
                if let Err(err) = machine.set_remaining(remaining.as_secs()) {
                    tracing::warn!("could not persist rest countdown: {err}");
                }
            }
            inner.recorder.overlay_tick(remaining, record.round).await;
            if remaining.is_zero() {
                break;
            }
            sleep(remaining.min(TICK)).await;
        }

        // ---- next round ----
        let (next_round, duration) = {
            let mut machine = inner.machine.lock();
            if let Err(err) = machine.begin_next_round() {
                tracing::error!("could not start next round: {err}");
                break;
            }
            (machine.record().round, machine.record().duration)
        };
        if let Err(err) = inner.sessions.create_round_dirs(next_round) {
            tracing::warn!("could not create corner session dirs: {err}");
        }
        inner.recorder.round_started(next_round).await;
        {
            let mut clock = inner.clock.lock();
            clock.remaining = Duration::from_secs(duration);
            clock.deadline = Some(Instant::now() + clock.remaining);
        }
        inner.gate.send_replace(true);
        inner.cue.play(Cue::RoundStart);
    }

    let mut clock = inner.clock.lock();
    clock.deadline = None;
}

/// Summary generation is detached; a failure never undoes the ended bout
fn spawn_summary(inner: &Arc<TimerInner>, record: RoundRecord) {
    let summary = Arc::clone(&inner.summary);
    tokio::spawn(async move {
        if let Err(err) = summary.bout_ended(record).await {
            tracing::error!("post-fight summary generation failed: {err}");
        }
    });
}

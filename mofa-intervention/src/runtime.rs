//! Async session runner
//!
//! Drives a [`LessonSession`] from one tokio task. Every input (samples,
//! responses, timer expiries, playback completions, the periodic re-check) is
//! delivered to that task through channels and handled one at a time, so the
//! core's busy flag and response gate are never raced.
//!
//! Speech runs in its own task and reports back on a completion channel. Nudge
//! timers are sleep tasks that are aborted on cancel; a late expiry is still
//! rejected by the core's token check.

use crate::clock::Clock;
use crate::data::{
    EmotionSample, RawEmotionSample, SessionOutcome, UserResponseEvent, UtteranceKind,
    UtteranceRequest,
};
use crate::dispatcher::OutputDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::session::{LessonSession, PlaybackOutcome, SessionEffect, SessionStatus};
use crate::turn::TimerToken;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Emotion samples buffered before new ones are dropped
const SAMPLE_CHANNEL_CAPACITY: usize = 32;
const RESPONSE_CHANNEL_CAPACITY: usize = 8;
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Control messages for a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    StartSignals,
    StopSignals,
}

/// How a session task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed(SessionOutcome),
    /// Torn down before completion (abandon, or handle dropped)
    Abandoned,
}

impl SessionEnd {
    pub fn outcome(self) -> Option<SessionOutcome> {
        match self {
            SessionEnd::Completed(outcome) => Some(outcome),
            SessionEnd::Abandoned => None,
        }
    }
}

/// Handle to a spawned session
pub struct SessionHandle {
    id: Uuid,
    samples: mpsc::Sender<EmotionSample>,
    responses: mpsc::Sender<UserResponseEvent>,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    status: Arc<RwLock<SessionStatus>>,
    task: JoinHandle<SessionEnd>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Offer a sample; returns false if it was dropped (backlog full or session gone)
    pub fn push_sample(&self, sample: EmotionSample) -> bool {
        match self.samples.try_send(sample) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Sample backlog full, dropping sample at {}", sample.timestamp);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Offer a detector sample as received; malformed samples are discarded
    pub fn push_raw_sample(&self, raw: RawEmotionSample) -> bool {
        match EmotionSample::try_from(raw) {
            Ok(sample) => self.push_sample(sample),
            Err(e) => {
                debug!("Discarding malformed sample: {}", e);
                false
            }
        }
    }

    /// Deliver a learner response
    pub async fn respond(&self, event: UserResponseEvent) -> EngineResult<()> {
        self.responses
            .send(event)
            .await
            .map_err(|_| EngineError::SessionClosed)
    }

    pub async fn start_signals(&self) -> EngineResult<()> {
        self.command(SessionCommand::StartSignals).await
    }

    pub async fn stop_signals(&self) -> EngineResult<()> {
        self.command(SessionCommand::StopSignals).await
    }

    async fn command(&self, command: SessionCommand) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::SessionClosed)
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Tear the session down; no further utterances are dispatched
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task to end
    pub async fn join(self) -> EngineResult<SessionEnd> {
        self.task
            .await
            .map_err(|e| EngineError::Task(e.to_string()))
    }
}

struct SpeakDone {
    kind: UtteranceKind,
    playback: PlaybackOutcome,
}

/// Spawn a session on the current tokio runtime and start it
pub fn spawn_session(
    session: LessonSession,
    dispatcher: Arc<dyn OutputDispatcher>,
    clock: Arc<dyn Clock>,
) -> SessionHandle {
    let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
    let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let cancel = CancellationToken::new();
    let status = Arc::new(RwLock::new(session.status()));
    let id = session.id();

    let runner = SessionRunner {
        session,
        dispatcher,
        clock,
        cancel: cancel.clone(),
        status: status.clone(),
        done_tx,
        timer_tx,
        timer: None,
    };
    let task = tokio::spawn(runner.run(RunnerInputs {
        samples: samples_rx,
        responses: responses_rx,
        commands: commands_rx,
        done: done_rx,
        timers: timer_rx,
    }));

    SessionHandle {
        id,
        samples: samples_tx,
        responses: responses_tx,
        commands: commands_tx,
        cancel,
        status,
        task,
    }
}

struct RunnerInputs {
    samples: mpsc::Receiver<EmotionSample>,
    responses: mpsc::Receiver<UserResponseEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    done: mpsc::UnboundedReceiver<SpeakDone>,
    timers: mpsc::UnboundedReceiver<TimerToken>,
}

struct SessionRunner {
    session: LessonSession,
    dispatcher: Arc<dyn OutputDispatcher>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    status: Arc<RwLock<SessionStatus>>,
    done_tx: mpsc::UnboundedSender<SpeakDone>,
    timer_tx: mpsc::UnboundedSender<TimerToken>,
    timer: Option<(TimerToken, JoinHandle<()>)>,
}

impl SessionRunner {
    async fn run(mut self, mut inputs: RunnerInputs) -> SessionEnd {
        let id = self.session.id();
        let recheck_every = Duration::from_millis(self.session.config().pattern_recheck_ms);
        let mut recheck =
            tokio::time::interval_at(tokio::time::Instant::now() + recheck_every, recheck_every);
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let effects = self.session.start(self.clock.now());
        self.apply(effects);
        self.publish();

        let end = loop {
            if self.session.is_finished() {
                break match self.session.outcome() {
                    Some(outcome) => SessionEnd::Completed(outcome),
                    None => SessionEnd::Abandoned,
                };
            }

            let effects = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Session {} cancelled", id);
                    break SessionEnd::Abandoned;
                }

                Some(done) = inputs.done.recv() => {
                    self.session.on_utterance_finished(done.kind, done.playback, self.clock.now())
                }

                Some(token) = inputs.timers.recv() => {
                    self.forget_timer(token);
                    self.session.on_timer(token, self.clock.now())
                }

                command = inputs.commands.recv() => match command {
                    Some(SessionCommand::StartSignals) => {
                        self.session.set_signals_active(true);
                        Vec::new()
                    }
                    Some(SessionCommand::StopSignals) => {
                        self.session.set_signals_active(false);
                        Vec::new()
                    }
                    None => {
                        info!("Session {} handle dropped", id);
                        break SessionEnd::Abandoned;
                    }
                },

                Some(event) = inputs.responses.recv() => {
                    self.session.on_response(event, self.clock.now())
                }

                Some(sample) = inputs.samples.recv() => {
                    self.session.on_sample(sample, self.clock.now())
                }

                _ = recheck.tick() => {
                    self.session.on_periodic_check(self.clock.now())
                }
            };

            self.apply(effects);
            self.publish();
        };

        let effects = self.session.teardown();
        self.apply(effects);
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
        self.publish();
        info!("Session {} ended: {:?}", id, end);
        end
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::Speak { kind, request } => self.speak(kind, request),
                SessionEffect::ArmTimer { token, after_ms } => self.arm_timer(token, after_ms),
                SessionEffect::CancelTimer { token } => self.cancel_timer(token),
                SessionEffect::Complete(outcome) => {
                    info!("🎉 Lesson complete: {:?}", outcome);
                }
            }
        }
    }

    fn speak(&self, kind: UtteranceKind, request: UtteranceRequest) {
        if self.dispatcher.is_busy() {
            warn!("Dispatcher reports busy while dispatching {:?}", kind);
        }
        let dispatcher = self.dispatcher.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            // Run playback in its own task so a panicking dispatcher still releases the speaker
            let playback_dispatcher = dispatcher.clone();
            let playback_request = request.clone();
            let result =
                tokio::spawn(async move { playback_dispatcher.speak(&playback_request).await })
                    .await;

            let playback = match result {
                Ok(Ok(())) => PlaybackOutcome::Spoken,
                Ok(Err(e)) => {
                    warn!("Speech failed for {:?}, showing text: {}", kind, e);
                    dispatcher.show_text(&request);
                    PlaybackOutcome::TextFallback
                }
                Err(e) => {
                    warn!("Speech task for {:?} aborted, showing text: {}", kind, e);
                    dispatcher.show_text(&request);
                    PlaybackOutcome::TextFallback
                }
            };
            let _ = done_tx.send(SpeakDone { kind, playback });
        });
    }

    fn arm_timer(&mut self, token: TimerToken, after_ms: u64) {
        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            let _ = timer_tx.send(token);
        });
        if let Some((old, previous)) = self.timer.replace((token, handle)) {
            debug!("Replacing timer {:?} with {:?}", old, token);
            previous.abort();
        }
    }

    fn cancel_timer(&mut self, token: TimerToken) {
        if matches!(self.timer, Some((armed, _)) if armed == token) {
            if let Some((_, handle)) = self.timer.take() {
                handle.abort();
            }
        }
    }

    fn forget_timer(&mut self, token: TimerToken) {
        if matches!(self.timer, Some((armed, _)) if armed == token) {
            self.timer = None;
        }
    }

    fn publish(&self) {
        *self.status.write() = self.session.status();
    }
}

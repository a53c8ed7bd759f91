//! Deterministic session core
//!
//! [`LessonSession`] combines signal history, the intervention policy, cooldown,
//! templates and the turn machine. Each entry point takes the current time and
//! returns the [`SessionEffect`]s the runtime must carry out. The core never sleeps
//! or spawns tasks, so whole sessions can be replayed in unit tests.
//!
//! The busy flag is the busy gate: it is `true` from the moment an utterance is
//! handed to the dispatcher until the runtime reports the playback finished.
//! Scripted utterances wait in the outbox while busy; interventions are dropped.

use crate::config::SessionConfig;
use crate::cooldown::CooldownWindow;
use crate::data::{
    EmotionSample, InterventionCategory, InterventionDecision, Millis, SessionOutcome,
    UserResponseEvent, UtteranceKind, UtteranceRequest,
};
use crate::error::EngineResult;
use crate::lesson::Lesson;
use crate::policies::{InterventionPolicy, PriorityGatePolicy};
use crate::signals::{compute, AggregateSignals, SignalHistory};
use crate::templates::{build_intervention, TemplateLibrary};
use crate::turn::{FeedbackKind, TimerToken, TurnAction, TurnMachine, TurnState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Work the runtime performs on behalf of the core
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Hand an utterance to the output dispatcher
    Speak {
        kind: UtteranceKind,
        request: UtteranceRequest,
    },
    ArmTimer { token: TimerToken, after_ms: Millis },
    CancelTimer { token: TimerToken },
    /// Lesson finished; deliver to the progression collaborator
    Complete(SessionOutcome),
}

/// How a dispatched utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackOutcome {
    Spoken,
    /// Speech failed and the text was shown instead
    TextFallback,
}

/// Point-in-time view of a session, published for observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub lesson_id: String,
    pub active: bool,
    pub signals_active: bool,
    pub busy: bool,
    pub turn_state: TurnState,
    pub question_index: usize,
    pub exchanges: u32,
    pub nudges_sent: u32,
    pub feedback_count: u32,
    pub interventions: u32,
    pub dropped_interventions: u32,
    pub text_fallbacks: u32,
    pub last_feedback: Option<FeedbackKind>,
    pub aggregate: AggregateSignals,
    pub outcome: Option<SessionOutcome>,
}

/// One lesson session
pub struct LessonSession {
    id: Uuid,
    config: SessionConfig,
    policy: Box<dyn InterventionPolicy>,
    templates: TemplateLibrary,
    history: SignalHistory,
    cooldown: CooldownWindow,
    turn: TurnMachine,
    rng: StdRng,

    busy: bool,
    speaking: Option<UtteranceKind>,
    outbox: VecDeque<(UtteranceKind, UtteranceRequest)>,
    last_template_id: Option<String>,
    active: bool,
    signals_active: bool,
    aggregate: AggregateSignals,

    nudges_sent: u32,
    feedback_count: u32,
    interventions: u32,
    dropped_interventions: u32,
    text_fallbacks: u32,
}

impl LessonSession {
    /// Create a session with the default policy and templates
    pub fn new(lesson: Lesson, config: SessionConfig) -> EngineResult<Self> {
        config.validate()?;
        let rng = match config.template_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            id: Uuid::new_v4(),
            policy: Box::new(PriorityGatePolicy::from_config(&config)),
            templates: TemplateLibrary::default(),
            history: SignalHistory::new(config.sample_history_size),
            cooldown: CooldownWindow::new(),
            turn: TurnMachine::new(lesson, &config)?,
            rng,
            busy: false,
            speaking: None,
            outbox: VecDeque::new(),
            last_template_id: None,
            active: false,
            signals_active: config.detector_enabled,
            aggregate: AggregateSignals::default(),
            nudges_sent: 0,
            feedback_count: 0,
            interventions: 0,
            dropped_interventions: 0,
            text_fallbacks: 0,
            config,
        })
    }

    pub fn with_policy(mut self, policy: Box<dyn InterventionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = templates;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn turn(&self) -> &TurnMachine {
        &self.turn
    }

    pub fn cooldown(&self) -> &CooldownWindow {
        &self.cooldown
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.turn.outcome()
    }

    /// Outcome delivered and closing line played out
    pub fn is_finished(&self) -> bool {
        self.turn.outcome().is_some() && !self.busy && self.outbox.is_empty()
    }

    /// Start the lesson: greeting first
    pub fn start(&mut self, now: Millis) -> Vec<SessionEffect> {
        if self.active || self.turn.state() != TurnState::Idle {
            warn!("Session {} already started", self.id);
            return Vec::new();
        }
        self.active = true;
        info!(
            "▶️ Starting session {} for lesson '{}' (signals: {}, policy: {})",
            self.id,
            self.turn.lesson().id,
            self.signals_active,
            self.policy.name()
        );
        let actions = self.turn.start();
        self.apply_turn(actions, now)
    }

    /// Subscribe or unsubscribe from emotion samples
    pub fn set_signals_active(&mut self, active: bool) {
        let active = active && self.config.detector_enabled;
        if self.signals_active != active {
            info!("Emotion signals {}", if active { "started" } else { "stopped" });
            self.signals_active = active;
        }
    }

    /// A new emotion sample arrived
    pub fn on_sample(&mut self, sample: EmotionSample, now: Millis) -> Vec<SessionEffect> {
        if !self.active || !self.signals_active || self.turn.outcome().is_some() {
            return Vec::new();
        }
        if !self.history.append(sample) {
            return Vec::new();
        }
        self.refresh_aggregate();
        let decision = self.policy.evaluate(
            &sample,
            &self.aggregate,
            self.busy,
            &self.cooldown,
            now,
            self.turn.exchanges(),
        );
        self.act_on(decision, Some(sample), now)
    }

    /// Periodic re-check without a new sample
    ///
    /// Runs in signal-blind mode too: the pace signal only needs turn gaps.
    pub fn on_periodic_check(&mut self, now: Millis) -> Vec<SessionEffect> {
        if !self.active || self.turn.outcome().is_some() {
            return Vec::new();
        }
        self.refresh_aggregate();
        let decision = self.policy.evaluate_periodic(
            &self.aggregate,
            self.busy,
            &self.cooldown,
            now,
            self.turn.exchanges(),
        );
        self.act_on(decision, None, now)
    }

    /// A learner response arrived
    pub fn on_response(&mut self, event: UserResponseEvent, now: Millis) -> Vec<SessionEffect> {
        if !self.active {
            debug!("Dropping response on inactive session");
            return Vec::new();
        }
        let latest = self.history.latest();
        match self.turn.on_response(&event, latest.as_ref(), now) {
            Ok(actions) => {
                self.feedback_count += 1;
                self.drop_queued_nudges();
                self.apply_turn(actions, now)
            }
            Err(rejected) => {
                debug!("Response '{}' rejected: {:?}", event.text, rejected);
                Vec::new()
            }
        }
    }

    /// A nudge timer fired
    pub fn on_timer(&mut self, token: TimerToken, now: Millis) -> Vec<SessionEffect> {
        if !self.active {
            return Vec::new();
        }
        let actions = self.turn.on_timer(token);
        self.apply_turn(actions, now)
    }

    /// The utterance handed out by the last `Speak` effect finished
    pub fn on_utterance_finished(
        &mut self,
        kind: UtteranceKind,
        playback: PlaybackOutcome,
        now: Millis,
    ) -> Vec<SessionEffect> {
        if self.speaking != Some(kind) {
            warn!("Playback finished for {:?} but {:?} was speaking", kind, self.speaking);
        }
        if playback == PlaybackOutcome::TextFallback {
            self.text_fallbacks += 1;
        }
        self.busy = false;
        self.speaking = None;
        if !self.active {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if kind.is_scripted() {
            let actions = self.turn.on_utterance_finished(kind, now);
            effects.extend(self.apply_turn(actions, now));
        } else {
            effects.extend(self.pump(now));
        }
        if self.is_finished() {
            self.active = false;
            info!("🏁 Session {} finished", self.id);
        }
        effects
    }

    /// Stop everything: no further utterances, timers or interventions
    pub fn teardown(&mut self) -> Vec<SessionEffect> {
        if !self.active && self.outbox.is_empty() && self.turn.armed_timer().is_none() {
            return Vec::new();
        }
        info!("⏹️ Tearing down session {}", self.id);
        self.active = false;
        self.signals_active = false;
        self.outbox.clear();
        let actions = self.turn.teardown();
        actions
            .into_iter()
            .filter_map(|action| match action {
                TurnAction::CancelTimer { token } => Some(SessionEffect::CancelTimer { token }),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            lesson_id: self.turn.lesson().id.clone(),
            active: self.active,
            signals_active: self.signals_active,
            busy: self.busy,
            turn_state: self.turn.state(),
            question_index: self.turn.question_index(),
            exchanges: self.turn.exchanges(),
            nudges_sent: self.nudges_sent,
            feedback_count: self.feedback_count,
            interventions: self.interventions,
            dropped_interventions: self.dropped_interventions,
            text_fallbacks: self.text_fallbacks,
            last_feedback: self.turn.last_feedback(),
            aggregate: self.aggregate,
            outcome: self.turn.outcome(),
        }
    }

    fn refresh_aggregate(&mut self) {
        let window = self.history.snapshot();
        self.aggregate = compute(&window, self.turn.turn_gaps());
    }

    fn act_on(
        &mut self,
        decision: InterventionDecision,
        trigger: Option<EmotionSample>,
        now: Millis,
    ) -> Vec<SessionEffect> {
        if !decision.should_intervene || decision.category == InterventionCategory::None {
            return Vec::new();
        }
        if self.busy {
            // The policy already holds on busy; a custom policy might not
            self.dropped_interventions += 1;
            debug!("Dropping {:?} intervention while busy", decision.category);
            return Vec::new();
        }

        let built = build_intervention(
            &self.templates,
            decision.category,
            trigger.as_ref(),
            &self.turn.lesson().learner_name,
            self.last_template_id.as_deref(),
            &mut self.rng,
        );
        let Some(built) = built else {
            return Vec::new();
        };

        self.cooldown.reset(now);
        self.last_template_id = built.template_id;
        self.interventions += 1;
        info!(
            "💬 Intervention {:?} ({:?}): {}",
            decision.category, decision.priority, built.text
        );

        let request = UtteranceRequest {
            text: built.text,
            category: decision.category,
            priority: decision.priority,
        };
        self.begin_speaking(UtteranceKind::Intervention, request, now)
    }

    fn apply_turn(&mut self, actions: Vec<TurnAction>, now: Millis) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                TurnAction::Say { kind, text } => {
                    if matches!(kind, UtteranceKind::Nudge(_)) {
                        self.nudges_sent += 1;
                    }
                    self.outbox.push_back((kind, UtteranceRequest::scripted(text)));
                }
                TurnAction::ArmTimer { token, after_ms } => {
                    effects.push(SessionEffect::ArmTimer { token, after_ms })
                }
                TurnAction::CancelTimer { token } => {
                    effects.push(SessionEffect::CancelTimer { token })
                }
                TurnAction::Finished(outcome) => effects.push(SessionEffect::Complete(outcome)),
            }
        }
        effects.extend(self.pump(now));
        effects
    }

    /// Forget re-prompts still waiting for the speaker; the learner already answered
    fn drop_queued_nudges(&mut self) {
        let queued = self.outbox.len();
        self.outbox.retain(|(kind, _)| !matches!(kind, UtteranceKind::Nudge(_)));
        let dropped = (queued - self.outbox.len()) as u32;
        if dropped > 0 {
            debug!("Dropping {} queued nudge(s)", dropped);
            self.nudges_sent = self.nudges_sent.saturating_sub(dropped);
        }
    }

    /// Dispatch the next scripted utterance if the speaker is free
    fn pump(&mut self, now: Millis) -> Vec<SessionEffect> {
        if self.busy || !self.active {
            return Vec::new();
        }
        match self.outbox.pop_front() {
            Some((kind, request)) => self.begin_speaking(kind, request, now),
            None => Vec::new(),
        }
    }

    fn begin_speaking(
        &mut self,
        kind: UtteranceKind,
        request: UtteranceRequest,
        now: Millis,
    ) -> Vec<SessionEffect> {
        self.busy = true;
        self.speaking = Some(kind);
        debug!("Speaking {:?}: {}", kind, request.text);

        let mut effects = vec![SessionEffect::Speak { kind, request }];
        if kind.is_scripted() {
            for action in self.turn.on_utterance_started(kind, now) {
                match action {
                    TurnAction::ArmTimer { token, after_ms } => {
                        effects.push(SessionEffect::ArmTimer { token, after_ms })
                    }
                    TurnAction::CancelTimer { token } => {
                        effects.push(SessionEffect::CancelTimer { token })
                    }
                    other => warn!("Unexpected action on dispatch: {:?}", other),
                }
            }
        }
        effects
    }
}

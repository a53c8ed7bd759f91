//! # MoFA Intervention Engine
//!
//! Runs a scripted spoken lesson for a young learner and decides, from a stream of
//! facial-emotion samples, when to interrupt the script with an encouraging,
//! celebratory or attention-recovering message.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────┬───────────────────────┬──────────────────────────────┐
//! │  Emotion detector     │  Speech recognizer    │  Nudge timers / re-check     │
//! │  handle.push_sample() │  handle.respond()     │  (spawned by the runner)     │
//! └──────────┬────────────┴──────────┬────────────┴───────────────┬──────────────┘
//!            │        mpsc channels, one session task             │
//!            ▼                       ▼                            ▼
//! ┌──────────────────────────────────────────────────────────────────────────────┐
//! │                     LessonSession (deterministic core)                       │
//! │                                                                              │
//! │  SignalHistory → compute() → InterventionPolicy ──┐                          │
//! │                               CooldownWindow  ────┤→ templates → Speak       │
//! │  TurnMachine (greeting, questions, nudges, feedback, outcome) → Speak/Timers │
//! └──────────────────────────────────────┬───────────────────────────────────────┘
//!                                        │  one utterance at a time (busy gate)
//!                                        ▼
//! ┌──────────────────────────────────────────────────────────────────────────────┐
//! │            OutputDispatcher: speak(), falling back to show_text()            │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use mofa_intervention::{spawn_session, LessonSession, SessionConfig, TokioClock};
//!
//! let session = LessonSession::new(lesson, SessionConfig::default())?;
//! let handle = spawn_session(session, dispatcher, Arc::new(TokioClock::new()));
//!
//! handle.push_sample(sample);
//! handle.respond(UserResponseEvent::new("Hello Ruby!", now)).await?;
//!
//! if let Some(outcome) = handle.join().await?.outcome() {
//!     progression.record(outcome);
//! }
//! ```
//!
//! ## Guarantees
//!
//! 1. **Busy Gate** - Nothing is dispatched while an utterance is playing
//! 2. **Single Feedback** - Each accepted response produces exactly one feedback line
//! 3. **Bounded Nudges** - At most two nudges per question
//! 4. **Cooldown** - Normal-priority interventions are spaced by `cooldown_ms`
//! 5. **Clean Teardown** - Nothing is dispatched after a session ends

pub mod clock;
pub mod config;
pub mod cooldown;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod lesson;
pub mod policies;
pub mod runtime;
pub mod session;
pub mod signals;
pub mod templates;
pub mod turn;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::SessionConfig;
pub use cooldown::CooldownWindow;
pub use data::{
    EmotionLabel, EmotionSample, InterventionCategory, InterventionDecision, Millis, Priority,
    RawEmotionSample, SessionOutcome, UserResponseEvent, UtteranceKind, UtteranceRequest,
};
pub use dispatcher::{MockDispatcher, OutputDispatcher};
pub use error::{DispatchError, EngineError, EngineResult, SampleError};
pub use lesson::{match_response, Lesson, MatchResult, Question};
pub use policies::{GateRule, InterventionPolicy, PriorityGatePolicy};
pub use runtime::{spawn_session, SessionCommand, SessionEnd, SessionHandle};
pub use session::{LessonSession, PlaybackOutcome, SessionEffect, SessionStatus};
pub use signals::{AggregateSignals, ConversationPace, EngagementLevel, SignalHistory};
pub use templates::{MessageTemplate, TemplateLibrary};
pub use turn::{FeedbackKind, TimerToken, TurnMachine, TurnState};

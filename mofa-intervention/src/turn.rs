//! Turn state machine for one lesson session
//!
//! Owns the greeting → question → answer → feedback lifecycle and the nudge timers.
//! It never talks to the dispatcher directly: every step returns [`TurnAction`]s
//! that the session core turns into utterances and timer operations.
//!
//! ```text
//! Idle ─start─▶ Greeting ─(greeting, goal spoken)─▶ AskingQuestion(i)
//!                                                        │ question dispatched, T1 armed
//!                                                        ▼
//!            ┌──────────── AwaitingResponse ──T1──▶ NudgePending1 ──T2──▶ NudgePending2
//!            │                   │ response               │ response          │ response
//!            │                   ▼                        ▼                   ▼
//!            │              Evaluating ──▶ Feedback (exactly one utterance)
//!            │ incorrect                     │ correct, more      │ correct, done / hard cap
//!            └───────────────────────────────┤                    ▼
//!                                    Advancing ─▶ AskingQuestion(i+1)   Complete
//! ```

use crate::config::SessionConfig;
use crate::data::{
    EmotionLabel, EmotionSample, Millis, SessionOutcome, UserResponseEvent, UtteranceKind,
};
use crate::error::EngineResult;
use crate::lesson::{match_response, Lesson, MatchResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle state of the lesson dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    Idle,
    Greeting,
    AskingQuestion,
    AwaitingResponse,
    NudgePending1,
    NudgePending2,
    Evaluating,
    Feedback,
    Advancing,
    Complete,
}

impl TurnState {
    /// States in which a learner response is accepted
    pub fn accepts_response(self) -> bool {
        matches!(
            self,
            TurnState::AwaitingResponse | TurnState::NudgePending1 | TurnState::NudgePending2
        )
    }
}

/// Id of an armed nudge timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Which feedback line was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedbackKind {
    CorrectFirstAttempt,
    Correct,
    Incorrect,
    IncorrectWithHint,
    /// Nothing recognisable was said; the hint leads the message
    HintFirst,
}

/// Work requested by the turn machine
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    Say { kind: UtteranceKind, text: String },
    ArmTimer { token: TimerToken, after_ms: Millis },
    CancelTimer { token: TimerToken },
    Finished(SessionOutcome),
}

/// Why a response was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRejected {
    /// A response for this turn was already accepted
    AlreadyResponded,
    /// The machine is not waiting for an answer
    NotAwaiting(TurnState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterFeedback {
    Ask(usize),
    Retry,
    Complete { forced: bool },
}

/// Turn state machine
#[derive(Debug)]
pub struct TurnMachine {
    lesson: Lesson,
    nudge_timeout_ms: Millis,
    max_nudges: u8,
    min_exchanges: u32,
    hard_cap: u32,
    score_floor: u8,
    forced_score_floor: u8,

    state: TurnState,
    question_index: usize,
    review_pass: bool,
    attempts: u32,
    nudges_sent: u8,
    has_responded: bool,
    exchanges: u32,
    correct: u32,
    first_attempt_correct: u32,
    armed_timer: Option<TimerToken>,
    next_token: u64,
    after_feedback: Option<AfterFeedback>,
    last_feedback: Option<FeedbackKind>,
    question_asked_at: Option<Millis>,
    turn_gaps: Vec<Millis>,
    outcome: Option<SessionOutcome>,
}

impl TurnMachine {
    /// Fails on a lesson that could not be walked, e.g. one with no questions
    pub fn new(lesson: Lesson, config: &SessionConfig) -> EngineResult<Self> {
        lesson.validate()?;
        Ok(Self {
            lesson,
            nudge_timeout_ms: config.nudge_timeout_ms,
            max_nudges: config.max_nudges_per_question.min(2),
            min_exchanges: config.min_exchanges_for_completion,
            hard_cap: config.max_exchanges_hard_cap,
            score_floor: config.score_floor,
            forced_score_floor: config.forced_completion_score_floor,
            state: TurnState::Idle,
            question_index: 0,
            review_pass: false,
            attempts: 0,
            nudges_sent: 0,
            has_responded: false,
            exchanges: 0,
            correct: 0,
            first_attempt_correct: 0,
            armed_timer: None,
            next_token: 0,
            after_feedback: None,
            last_feedback: None,
            question_asked_at: None,
            turn_gaps: Vec::new(),
            outcome: None,
        })
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    /// Responses accepted on the current question so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn nudges_sent(&self) -> u8 {
        self.nudges_sent
    }

    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    pub fn has_responded(&self) -> bool {
        self.has_responded
    }

    pub fn armed_timer(&self) -> Option<TimerToken> {
        self.armed_timer
    }

    pub fn last_feedback(&self) -> Option<FeedbackKind> {
        self.last_feedback
    }

    /// Hint for the current question, available from the second attempt
    pub fn available_hint(&self) -> Option<&str> {
        if self.attempts >= 2 {
            self.current_hint()
        } else {
            None
        }
    }

    /// Measured latency of each exchange, question dispatched to response accepted
    pub fn turn_gaps(&self) -> &[Millis] {
        &self.turn_gaps
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    pub fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    /// Begin the lesson with the greeting
    pub fn start(&mut self) -> Vec<TurnAction> {
        if self.state != TurnState::Idle {
            warn!("Ignoring start in state {:?}", self.state);
            return Vec::new();
        }
        self.transition(TurnState::Greeting);
        vec![TurnAction::Say {
            kind: UtteranceKind::Greeting,
            text: self.lesson.greeting.clone(),
        }]
    }

    /// A scripted utterance has been handed to the dispatcher
    pub fn on_utterance_started(&mut self, kind: UtteranceKind, now: Millis) -> Vec<TurnAction> {
        let mut actions = Vec::new();
        if kind == UtteranceKind::Question && self.state == TurnState::AskingQuestion {
            self.transition(TurnState::AwaitingResponse);
            self.question_asked_at = Some(now);
            if self.nudges_sent < self.max_nudges {
                actions.extend(self.arm_timer());
            }
        }
        actions
    }

    /// A scripted utterance finished playing (or fell back to text)
    pub fn on_utterance_finished(&mut self, kind: UtteranceKind, now: Millis) -> Vec<TurnAction> {
        match (kind, self.state) {
            (UtteranceKind::Greeting, TurnState::Greeting) => vec![TurnAction::Say {
                kind: UtteranceKind::Goal,
                text: self.lesson.goal.clone(),
            }],
            (UtteranceKind::Goal, TurnState::Greeting) => self.ask(0),
            (UtteranceKind::Feedback, TurnState::Feedback) => self.after_feedback(now),
            _ => Vec::new(),
        }
    }

    /// Accept a learner response.
    ///
    /// `has_responded` is set before anything else, so a second response for the
    /// same turn is rejected no matter how quickly it follows.
    pub fn on_response(
        &mut self,
        event: &UserResponseEvent,
        latest_sample: Option<&EmotionSample>,
        now: Millis,
    ) -> Result<Vec<TurnAction>, ResponseRejected> {
        if self.has_responded {
            return Err(ResponseRejected::AlreadyResponded);
        }
        if !self.state.accepts_response() {
            return Err(ResponseRejected::NotAwaiting(self.state));
        }
        self.has_responded = true;

        let mut actions = self.cancel_timer();
        self.transition(TurnState::Evaluating);
        self.exchanges += 1;
        self.attempts += 1;
        if let Some(asked_at) = self.question_asked_at {
            self.turn_gaps.push(now.saturating_sub(asked_at));
        }

        let question = &self.lesson.questions[self.question_index];
        let result = match_response(&event.text, &question.expected_responses);
        let hint = question.hint.clone();
        let (kind, text) = compose_feedback(
            result,
            self.attempts,
            hint.as_deref(),
            latest_sample,
            event.pronunciation_score,
        );

        if result.is_correct() {
            self.correct += 1;
            if self.attempts == 1 {
                self.first_attempt_correct += 1;
            }
        }

        let next = if self.exchanges >= self.hard_cap {
            AfterFeedback::Complete { forced: true }
        } else if result.is_correct() {
            self.next_question()
        } else {
            AfterFeedback::Retry
        };

        info!(
            "Response '{}' on question {} attempt {}: {:?} → {:?}",
            event.text, self.question_index, self.attempts, result, next
        );

        self.after_feedback = Some(next);
        self.last_feedback = Some(kind);
        self.transition(TurnState::Feedback);
        actions.push(TurnAction::Say {
            kind: UtteranceKind::Feedback,
            text,
        });
        Ok(actions)
    }

    /// A nudge timer fired
    pub fn on_timer(&mut self, token: TimerToken) -> Vec<TurnAction> {
        if self.armed_timer != Some(token) {
            debug!("Ignoring stale timer {:?}", token);
            return Vec::new();
        }
        self.armed_timer = None;

        if !self.state.accepts_response()
            || self.has_responded
            || self.nudges_sent >= self.max_nudges
        {
            return Vec::new();
        }

        self.nudges_sent += 1;
        let number = self.nudges_sent;
        self.transition(if number == 1 {
            TurnState::NudgePending1
        } else {
            TurnState::NudgePending2
        });

        let mut actions = vec![TurnAction::Say {
            kind: UtteranceKind::Nudge(number),
            text: self.nudge_text(number),
        }];
        if self.nudges_sent < self.max_nudges {
            actions.extend(self.arm_timer());
        }
        actions
    }

    /// Cancel any outstanding timer for teardown
    pub fn teardown(&mut self) -> Vec<TurnAction> {
        self.cancel_timer()
    }

    fn ask(&mut self, index: usize) -> Vec<TurnAction> {
        let mut actions = self.cancel_timer();
        self.question_index = index;
        self.attempts = 0;
        self.nudges_sent = 0;
        self.has_responded = false;
        self.question_asked_at = None;
        self.transition(TurnState::AskingQuestion);

        let prompt = &self.lesson.questions[index].prompt;
        let text = if self.review_pass {
            format!("Let's review! {}", prompt)
        } else {
            prompt.clone()
        };
        actions.push(TurnAction::Say {
            kind: UtteranceKind::Question,
            text,
        });
        actions
    }

    fn next_question(&mut self) -> AfterFeedback {
        let next = self.question_index + 1;
        if next < self.lesson.questions.len() {
            AfterFeedback::Ask(next)
        } else if self.exchanges < self.min_exchanges {
            AfterFeedback::Ask(0)
        } else {
            AfterFeedback::Complete { forced: false }
        }
    }

    fn after_feedback(&mut self, now: Millis) -> Vec<TurnAction> {
        match self.after_feedback.take() {
            Some(AfterFeedback::Ask(index)) => {
                self.transition(TurnState::Advancing);
                if index <= self.question_index {
                    self.review_pass = true;
                }
                self.ask(index)
            }
            Some(AfterFeedback::Retry) => {
                self.has_responded = false;
                self.question_asked_at = Some(now);
                self.transition(TurnState::AwaitingResponse);
                if self.nudges_sent < self.max_nudges {
                    self.arm_timer()
                } else {
                    Vec::new()
                }
            }
            Some(AfterFeedback::Complete { forced }) => self.complete(forced),
            None => Vec::new(),
        }
    }

    fn complete(&mut self, forced: bool) -> Vec<TurnAction> {
        let mut actions = self.cancel_timer();
        let outcome = self.build_outcome(forced);
        info!(
            "Lesson '{}' complete (forced: {}): {:?}",
            self.lesson.id, forced, outcome
        );
        self.outcome = Some(outcome);
        self.transition(TurnState::Complete);
        actions.push(TurnAction::Say {
            kind: UtteranceKind::Closing,
            text: format!(
                "Amazing work today, {}! You finished {}.",
                self.learner_name(),
                self.lesson.title
            ),
        });
        actions.push(TurnAction::Finished(outcome));
        actions
    }

    fn build_outcome(&self, forced: bool) -> SessionOutcome {
        let raw = if self.exchanges == 0 {
            0
        } else {
            ((self.correct as f64 / self.exchanges as f64) * 100.0).round() as u8
        };
        let mut final_score = raw.clamp(self.score_floor, 100);
        if forced {
            final_score = final_score.max(self.forced_score_floor);
        }
        SessionOutcome {
            total_exchanges: self.exchanges,
            correct_count: self.correct,
            final_score,
            xp_earned: self.correct * 10 + self.first_attempt_correct * 5 + final_score as u32 / 10,
        }
    }

    fn arm_timer(&mut self) -> Vec<TurnAction> {
        let mut actions = self.cancel_timer();
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed_timer = Some(token);
        actions.push(TurnAction::ArmTimer {
            token,
            after_ms: self.nudge_timeout_ms,
        });
        actions
    }

    fn cancel_timer(&mut self) -> Vec<TurnAction> {
        match self.armed_timer.take() {
            Some(token) => vec![TurnAction::CancelTimer { token }],
            None => Vec::new(),
        }
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            debug!("Turn state {:?} → {:?}", self.state, next);
            self.state = next;
        }
    }

    fn current_hint(&self) -> Option<&str> {
        self.lesson.questions[self.question_index].hint.as_deref()
    }

    fn learner_name(&self) -> &str {
        let name = self.lesson.learner_name.trim();
        if name.is_empty() {
            "friend"
        } else {
            name
        }
    }

    fn nudge_text(&self, number: u8) -> String {
        let prompt = &self.lesson.questions[self.question_index].prompt;
        if number == 1 {
            format!("Take your time, {}. {}", self.learner_name(), prompt)
        } else {
            format!("I'm still here whenever you're ready. {}", prompt)
        }
    }
}

/// Build the single feedback line for a response
fn compose_feedback(
    result: MatchResult,
    attempts: u32,
    hint: Option<&str>,
    latest_sample: Option<&EmotionSample>,
    pronunciation_score: Option<u8>,
) -> (FeedbackKind, String) {
    let (kind, mut text) = match result {
        MatchResult::Correct if attempts == 1 => (
            FeedbackKind::CorrectFirstAttempt,
            "Great job! That's exactly right!".to_string(),
        ),
        MatchResult::Correct => (
            FeedbackKind::Correct,
            "You got it! Nice work sticking with it.".to_string(),
        ),
        MatchResult::Ambiguous => match hint {
            Some(hint) => (
                FeedbackKind::HintFirst,
                format!("Here's a hint: {}. Can you try again?", hint),
            ),
            None => (
                FeedbackKind::HintFirst,
                "I didn't quite catch that. Can you say it again?".to_string(),
            ),
        },
        MatchResult::Incorrect => match hint {
            Some(hint) if attempts >= 2 => (
                FeedbackKind::IncorrectWithHint,
                format!("Not quite. Here's a hint: {}.", hint),
            ),
            _ => (
                FeedbackKind::Incorrect,
                "Not quite. Let's try again!".to_string(),
            ),
        },
    };

    if let Some(sample) = latest_sample {
        if sample.emotion_label.is_negative() {
            text.push_str(" Don't worry, you're doing fine.");
        } else if sample.emotion_label == EmotionLabel::Happy && result.is_correct() {
            text.push_str(" I can see you're enjoying this!");
        }
    }

    if let Some(score) = pronunciation_score {
        text.push_str(match score {
            80..=u8::MAX => " Your pronunciation was excellent!",
            50..=79 => " Your pronunciation is getting better.",
            _ => " Let's practice saying it clearly together.",
        });
    }

    (kind, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::lesson::Question;

    fn lesson(questions: Vec<Question>) -> Lesson {
        Lesson {
            id: "greetings".into(),
            title: "Saying Hello".into(),
            learner_name: "Mia".into(),
            greeting: "Hi Mia!".into(),
            goal: "Today we practice greetings.".into(),
            questions,
        }
    }

    fn hello_lesson() -> Lesson {
        lesson(vec![
            Question::new("Ruby says hello. What do you say?", &["hello", "hi ruby"])
                .with_hint("Try saying hello"),
            Question::new("How do you say goodbye?", &["goodbye", "bye"]),
        ])
    }

    fn says(actions: &[TurnAction]) -> Vec<UtteranceKind> {
        actions
            .iter()
            .filter_map(|a| match a {
                TurnAction::Say { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    fn armed(actions: &[TurnAction]) -> Option<TimerToken> {
        actions.iter().find_map(|a| match a {
            TurnAction::ArmTimer { token, .. } => Some(*token),
            _ => None,
        })
    }

    /// Drive greeting and goal, dispatch the first question
    fn to_first_question(machine: &mut TurnMachine) -> TimerToken {
        assert_eq!(says(&machine.start()), vec![UtteranceKind::Greeting]);
        let actions = machine.on_utterance_finished(UtteranceKind::Greeting, 0);
        assert_eq!(says(&actions), vec![UtteranceKind::Goal]);
        let actions = machine.on_utterance_finished(UtteranceKind::Goal, 0);
        assert_eq!(says(&actions), vec![UtteranceKind::Question]);
        assert_eq!(machine.state(), TurnState::AskingQuestion);
        let actions = machine.on_utterance_started(UtteranceKind::Question, 1_000);
        assert_eq!(machine.state(), TurnState::AwaitingResponse);
        armed(&actions).expect("T1 armed")
    }

    #[test]
    fn test_correct_first_attempt_advances() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        let t1 = to_first_question(&mut machine);

        let actions = machine
            .on_response(&UserResponseEvent::new("Hello Ruby!", 4_000), None, 4_000)
            .unwrap();
        assert!(actions.contains(&TurnAction::CancelTimer { token: t1 }));
        assert_eq!(says(&actions), vec![UtteranceKind::Feedback]);
        assert_eq!(machine.state(), TurnState::Feedback);
        assert_eq!(machine.last_feedback(), Some(FeedbackKind::CorrectFirstAttempt));
        assert_eq!(machine.turn_gaps(), &[3_000]);

        let actions = machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        assert_eq!(says(&actions), vec![UtteranceKind::Question]);
        assert_eq!(machine.state(), TurnState::AskingQuestion);
        assert_eq!(machine.question_index(), 1);
    }

    #[test]
    fn test_second_response_rejected() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        to_first_question(&mut machine);
        machine
            .on_response(&UserResponseEvent::new("hello", 2_000), None, 2_000)
            .unwrap();
        assert_eq!(
            machine.on_response(&UserResponseEvent::new("hello", 2_001), None, 2_001),
            Err(ResponseRejected::AlreadyResponded)
        );
    }

    #[test]
    fn test_response_before_question_rejected() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        machine.start();
        assert_eq!(
            machine.on_response(&UserResponseEvent::new("hello", 10), None, 10),
            Err(ResponseRejected::NotAwaiting(TurnState::Greeting))
        );
    }

    #[test]
    fn test_two_nudges_then_silence() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        let t1 = to_first_question(&mut machine);

        let actions = machine.on_timer(t1);
        assert_eq!(says(&actions), vec![UtteranceKind::Nudge(1)]);
        assert_eq!(machine.state(), TurnState::NudgePending1);
        let t2 = armed(&actions).expect("T2 armed");

        let actions = machine.on_timer(t2);
        assert_eq!(says(&actions), vec![UtteranceKind::Nudge(2)]);
        assert_eq!(machine.state(), TurnState::NudgePending2);
        assert!(armed(&actions).is_none());
        assert_eq!(machine.armed_timer(), None);

        // Replaying old tokens never produces a third nudge
        assert!(machine.on_timer(t1).is_empty());
        assert!(machine.on_timer(t2).is_empty());
        assert_eq!(machine.nudges_sent(), 2);
    }

    #[test]
    fn test_response_after_nudge_is_accepted() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        let t1 = to_first_question(&mut machine);
        machine.on_timer(t1);
        let actions = machine
            .on_response(&UserResponseEvent::new("hi ruby", 400_000), None, 400_000)
            .unwrap();
        assert_eq!(says(&actions), vec![UtteranceKind::Feedback]);
        assert!(machine.armed_timer().is_none());
    }

    #[test]
    fn test_incorrect_retries_with_hint_from_second_attempt() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        to_first_question(&mut machine);

        machine
            .on_response(&UserResponseEvent::new("banana", 2_000), None, 2_000)
            .unwrap();
        assert_eq!(machine.last_feedback(), Some(FeedbackKind::Incorrect));
        assert_eq!(machine.available_hint(), None);

        let actions = machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        assert_eq!(machine.state(), TurnState::AwaitingResponse);
        assert_eq!(machine.question_index(), 0);
        assert!(armed(&actions).is_some());

        let actions = machine
            .on_response(&UserResponseEvent::new("apple", 3_000), None, 3_000)
            .unwrap();
        assert_eq!(machine.last_feedback(), Some(FeedbackKind::IncorrectWithHint));
        assert_eq!(machine.attempts(), 2);
        assert_eq!(machine.available_hint(), Some("Try saying hello"));
        match &actions.last() {
            Some(TurnAction::Say { text, .. }) => assert!(text.contains("Try saying hello")),
            other => panic!("expected feedback, got {:?}", other),
        }
    }

    #[test]
    fn test_nudge_cap_survives_retries() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        let t1 = to_first_question(&mut machine);
        let t2 = armed(&machine.on_timer(t1)).unwrap();
        machine.on_timer(t2);

        machine
            .on_response(&UserResponseEvent::new("nope", 700_000), None, 700_000)
            .unwrap();
        let actions = machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        // Both nudges already spent on this question
        assert!(armed(&actions).is_none());
        assert_eq!(machine.nudges_sent(), 2);
    }

    #[test]
    fn test_ambiguous_gets_hint_first() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        to_first_question(&mut machine);
        let actions = machine
            .on_response(&UserResponseEvent::new("...", 2_000), None, 2_000)
            .unwrap();
        assert_eq!(machine.last_feedback(), Some(FeedbackKind::HintFirst));
        match actions.last() {
            Some(TurnAction::Say { text, .. }) => assert!(text.starts_with("Here's a hint")),
            other => panic!("expected feedback, got {:?}", other),
        }
    }

    #[test]
    fn test_feedback_combines_emotion_and_pronunciation() {
        let sad = EmotionSample {
            timestamp: 0,
            emotion_label: EmotionLabel::Sad,
            confidence: 0.9,
            is_gaze_on_screen: true,
        };
        let (kind, text) = compose_feedback(MatchResult::Correct, 1, None, Some(&sad), Some(91));
        assert_eq!(kind, FeedbackKind::CorrectFirstAttempt);
        assert_eq!(
            text,
            concat!(
                "Great job! That's exactly right! Don't worry, you're doing fine. ",
                "Your pronunciation was excellent!"
            )
        );
    }

    #[test]
    fn test_last_question_completes_after_minimum() {
        let config = SessionConfig {
            min_exchanges_for_completion: 2,
            ..SessionConfig::default()
        };
        let mut machine = TurnMachine::new(hello_lesson(), &config).unwrap();
        to_first_question(&mut machine);
        machine.on_response(&UserResponseEvent::new("hello", 2_000), None, 2_000).unwrap();
        machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        machine.on_utterance_started(UtteranceKind::Question, 3_000);
        machine.on_response(&UserResponseEvent::new("bye", 4_000), None, 4_000).unwrap();

        let actions = machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        assert_eq!(says(&actions), vec![UtteranceKind::Closing]);
        assert_eq!(machine.state(), TurnState::Complete);
        let outcome = machine.outcome().unwrap();
        assert_eq!(outcome.total_exchanges, 2);
        assert_eq!(outcome.correct_count, 2);
        assert_eq!(outcome.final_score, 100);
        assert_eq!(outcome.xp_earned, 2 * 10 + 2 * 5 + 10);
        assert!(actions.contains(&TurnAction::Finished(outcome)));
    }

    #[test]
    fn test_runs_review_pass_below_minimum() {
        let mut machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        to_first_question(&mut machine);
        machine.on_response(&UserResponseEvent::new("hello", 2_000), None, 2_000).unwrap();
        machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        machine.on_utterance_started(UtteranceKind::Question, 3_000);
        machine.on_response(&UserResponseEvent::new("bye", 4_000), None, 4_000).unwrap();

        let actions = machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        assert_eq!(machine.question_index(), 0);
        match actions.last() {
            Some(TurnAction::Say { kind: UtteranceKind::Question, text }) => {
                assert!(text.starts_with("Let's review!"))
            }
            other => panic!("expected review question, got {:?}", other),
        }
    }

    #[test]
    fn test_hard_cap_forces_completion_with_floor() {
        let config = SessionConfig {
            max_exchanges_hard_cap: 20,
            ..SessionConfig::default()
        };
        let mut machine = TurnMachine::new(hello_lesson(), &config).unwrap();
        to_first_question(&mut machine);

        // Nineteen wrong answers, then a twentieth wrong answer hits the cap
        for i in 0..20u64 {
            let now = 10_000 + i * 1_000;
            machine
                .on_response(&UserResponseEvent::new("wrong", now), None, now)
                .unwrap();
            machine.on_utterance_finished(UtteranceKind::Feedback, 0);
        }

        assert_eq!(machine.state(), TurnState::Complete);
        let outcome = machine.outcome().unwrap();
        assert_eq!(outcome.total_exchanges, 20);
        assert_eq!(outcome.correct_count, 0);
        assert!(outcome.final_score >= 85);
    }

    #[test]
    fn test_score_floor_without_forcing() {
        let machine = TurnMachine::new(hello_lesson(), &SessionConfig::default()).unwrap();
        let outcome = machine.build_outcome(false);
        assert_eq!(outcome.final_score, 60);
    }

    #[test]
    fn test_lesson_without_questions_rejected() {
        let result = TurnMachine::new(lesson(Vec::new()), &SessionConfig::default());
        assert!(matches!(result, Err(EngineError::InvalidLesson(_))));
    }
}

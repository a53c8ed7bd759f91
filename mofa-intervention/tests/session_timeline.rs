//! End-to-end session timelines on paused tokio time

use mofa_intervention::{
    spawn_session, DispatchError, EmotionLabel, EmotionSample, FeedbackKind, InterventionCategory,
    Lesson, LessonSession, MockDispatcher, Question, SessionConfig, SessionEnd, SessionHandle,
    SessionStatus, TokioClock, TurnState, UserResponseEvent,
};
use std::sync::Arc;
use std::time::Duration;

const SPEECH_MS: u64 = 1_000;

fn lesson(questions: usize) -> Lesson {
    let pool = [
        Question::new("Ruby says hello. What do you say?", &["hello", "hi ruby"])
            .with_hint("Say hello"),
        Question::new("How do you say goodbye?", &["goodbye", "bye"]),
        Question::new("What do you say when you get a present?", &["thank you"]),
    ];
    Lesson {
        id: "greetings".into(),
        title: "Saying Hello".into(),
        learner_name: "Mia".into(),
        greeting: "Hi Mia! I'm Ruby.".into(),
        goal: "Today we practice greetings.".into(),
        questions: pool.iter().cycle().take(questions).cloned().collect(),
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        template_seed: Some(7),
        ..SessionConfig::default()
    }
}

fn start(lesson: Lesson, config: SessionConfig) -> (SessionHandle, Arc<MockDispatcher>) {
    let dispatcher = Arc::new(MockDispatcher::new(Duration::from_millis(SPEECH_MS)));
    let session = LessonSession::new(lesson, config).expect("valid session");
    let handle = spawn_session(session, dispatcher.clone(), Arc::new(TokioClock::new()));
    (handle, dispatcher)
}

fn sample(label: EmotionLabel, confidence: f64) -> EmotionSample {
    EmotionSample {
        timestamp: 0,
        emotion_label: label,
        confidence,
        is_gaze_on_screen: true,
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Poll the published status until `ready` holds
async fn wait_for(handle: &SessionHandle, ready: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
    for _ in 0..10_000 {
        let status = handle.status();
        if ready(&status) {
            return status;
        }
        advance(50).await;
    }
    panic!("condition never reached: {:?}", handle.status());
}

async fn wait_for_answer(handle: &SessionHandle) -> SessionStatus {
    wait_for(handle, |s| {
        !s.busy
            && matches!(
                s.turn_state,
                TurnState::AwaitingResponse | TurnState::NudgePending1 | TurnState::NudgePending2
            )
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_correct_first_answer_gets_one_feedback_and_advances() {
    let (handle, dispatcher) = start(lesson(2), config());
    let status = wait_for_answer(&handle).await;
    assert_eq!(status.question_index, 0);

    handle
        .respond(UserResponseEvent::new("Hello Ruby!", 0))
        .await
        .unwrap();
    let status = wait_for(&handle, |s| {
        s.question_index == 1 && s.turn_state == TurnState::AwaitingResponse
    })
    .await;

    assert_eq!(status.feedback_count, 1);
    assert_eq!(status.last_feedback, Some(FeedbackKind::CorrectFirstAttempt));
    let praise = dispatcher
        .texts()
        .iter()
        .filter(|t| t.starts_with("Great job!"))
        .count();
    assert_eq!(praise, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_response_yields_single_feedback() {
    let (handle, dispatcher) = start(lesson(2), config());
    wait_for_answer(&handle).await;

    handle.respond(UserResponseEvent::new("hello", 0)).await.unwrap();
    handle.respond(UserResponseEvent::new("hello", 1)).await.unwrap();
    let status = wait_for(&handle, |s| s.question_index == 1 && !s.busy).await;

    assert_eq!(status.feedback_count, 1);
    assert_eq!(status.exchanges, 1);
    let feedback = dispatcher
        .texts()
        .iter()
        .filter(|t| t.starts_with("Great job!") || t.starts_with("Not quite"))
        .count();
    assert_eq!(feedback, 1);
}

#[tokio::test(start_paused = true)]
async fn test_silence_produces_exactly_two_nudges() {
    let (handle, dispatcher) = start(lesson(2), config());
    wait_for_answer(&handle).await;

    advance(300_000).await;
    let status = handle.status();
    assert_eq!(status.nudges_sent, 1);
    assert_eq!(status.turn_state, TurnState::NudgePending1);

    advance(300_000).await;
    let status = handle.status();
    assert_eq!(status.nudges_sent, 2);
    assert_eq!(status.turn_state, TurnState::NudgePending2);

    advance(3 * 3_600_000).await;
    assert_eq!(handle.status().nudges_sent, 2);

    let texts = dispatcher.texts();
    assert_eq!(texts.iter().filter(|t| t.starts_with("Take your time")).count(), 1);
    assert_eq!(texts.iter().filter(|t| t.starts_with("I'm still here")).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hard_cap_forces_completion() {
    let (handle, _dispatcher) = start(lesson(1), config());

    for exchange in 1..=20u32 {
        wait_for_answer(&handle).await;
        handle
            .respond(UserResponseEvent::new("I don't know", exchange as u64))
            .await
            .unwrap();
        wait_for(&handle, |s| s.exchanges == exchange).await;
    }

    let end = handle.join().await.unwrap();
    let outcome = end.outcome().expect("lesson completed");
    assert_eq!(outcome.total_exchanges, 20);
    assert_eq!(outcome.correct_count, 0);
    assert!(outcome.final_score >= 85);
}

#[tokio::test(start_paused = true)]
async fn test_full_lesson_outcome() {
    let config = SessionConfig {
        min_exchanges_for_completion: 3,
        ..config()
    };
    let (handle, dispatcher) = start(lesson(3), config);

    for answer in ["hi ruby", "see you", "bye", "thank you"] {
        wait_for_answer(&handle).await;
        handle.respond(UserResponseEvent::new(answer, 0)).await.unwrap();
        advance(10).await;
    }

    let end = handle.join().await.unwrap();
    let outcome = end.outcome().expect("lesson completed");
    assert_eq!(outcome.total_exchanges, 4);
    assert_eq!(outcome.correct_count, 3);
    assert_eq!(outcome.final_score, 75);
    // 3 correct, 2 of them first try, score 75
    assert_eq!(outcome.xp_earned, 30 + 10 + 7);
    assert!(dispatcher
        .texts()
        .last()
        .is_some_and(|t| t.starts_with("Amazing work today, Mia!")));
}

#[tokio::test(start_paused = true)]
async fn test_negative_emotion_interrupts_when_idle() {
    let (handle, dispatcher) = start(lesson(2), config());
    wait_for_answer(&handle).await;

    assert!(handle.push_sample(sample(EmotionLabel::Angry, 0.85)));
    let status = wait_for(&handle, |s| s.interventions == 1).await;
    assert_eq!(status.dropped_interventions, 0);

    let last = dispatcher.requests().pop().unwrap();
    assert_eq!(last.category, InterventionCategory::UrgentNegative);
}

#[tokio::test(start_paused = true)]
async fn test_busy_speaker_never_overlaps() {
    let (handle, dispatcher) = start(lesson(2), config());

    // Greeting is playing: every sample must be ignored
    advance(10).await;
    assert!(handle.status().busy);
    for _ in 0..5 {
        handle.push_sample(sample(EmotionLabel::Sad, 0.99));
    }
    advance(100).await;
    assert_eq!(handle.status().interventions, 0);

    wait_for_answer(&handle).await;
    handle.push_sample(sample(EmotionLabel::Happy, 0.95));
    advance(10).await;
    handle.push_sample(sample(EmotionLabel::Fearful, 0.95));
    handle.respond(UserResponseEvent::new("hello", 0)).await.unwrap();
    wait_for(&handle, |s| s.question_index == 1 && !s.busy).await;

    assert_eq!(dispatcher.max_in_flight(), 1);
    assert_eq!(handle.status().interventions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_speech_failure_falls_back_to_text() {
    let (handle, dispatcher) = start(lesson(2), config());
    dispatcher.fail_next(DispatchError::Unavailable);

    let status = wait_for_answer(&handle).await;
    assert_eq!(status.text_fallbacks, 1);
    assert_eq!(dispatcher.shown().len(), 1);
    assert_eq!(dispatcher.shown()[0].text, "Hi Mia! I'm Ruby.");
}

#[tokio::test(start_paused = true)]
async fn test_abandon_cancels_pending_nudges() {
    let (handle, dispatcher) = start(lesson(2), config());
    wait_for_answer(&handle).await;
    let spoken = dispatcher.texts().len();

    handle.abandon();
    advance(3_600_000).await;

    assert_eq!(dispatcher.texts().len(), spoken);
    assert_eq!(handle.join().await.unwrap(), SessionEnd::Abandoned);
}

#[tokio::test(start_paused = true)]
async fn test_signal_blind_session_still_completes() {
    let config = SessionConfig {
        detector_enabled: false,
        min_exchanges_for_completion: 1,
        ..config()
    };
    let (handle, _dispatcher) = start(lesson(1), config);
    wait_for_answer(&handle).await;

    handle.push_sample(sample(EmotionLabel::Sad, 0.99));
    handle.respond(UserResponseEvent::new("hello", 0)).await.unwrap();

    let end = handle.join().await.unwrap();
    assert_eq!(end.outcome().map(|o| o.correct_count), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_stop_signals_mutes_engine() {
    let (handle, _dispatcher) = start(lesson(2), config());
    wait_for_answer(&handle).await;

    handle.stop_signals().await.unwrap();
    advance(10).await;
    handle.push_sample(sample(EmotionLabel::Angry, 0.99));
    advance(100).await;
    assert_eq!(handle.status().interventions, 0);
    assert!(!handle.status().signals_active);

    handle.start_signals().await.unwrap();
    advance(10).await;
    handle.push_sample(sample(EmotionLabel::Angry, 0.99));
    wait_for(&handle, |s| s.interventions == 1).await;
}

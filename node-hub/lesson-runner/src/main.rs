mod config;
mod timeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use mofa_intervention::{
    spawn_session, DispatchError, InterventionCategory, LessonSession, OutputDispatcher,
    SessionEnd, TokioClock, UserResponseEvent, UtteranceRequest,
};
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;
use crate::timeline::{Timeline, TimelineAction};

/// Prints utterances and waits as long as speaking them would take
struct ConsoleDispatcher {
    words_per_minute: u32,
    speaking: AtomicBool,
}

impl ConsoleDispatcher {
    fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
            speaking: AtomicBool::new(false),
        }
    }

    /// Rough estimate: words / rate, at least half a second
    fn speaking_time(&self, text: &str) -> Duration {
        let word_count = text.split_whitespace().count() as f64;
        let secs = word_count / self.words_per_minute as f64 * 60.0;
        Duration::from_secs_f64(secs.max(0.5))
    }
}

#[async_trait::async_trait]
impl OutputDispatcher for ConsoleDispatcher {
    async fn speak(&self, request: &UtteranceRequest) -> Result<(), DispatchError> {
        self.speaking.store(true, Ordering::SeqCst);
        let marker = match request.category {
            InterventionCategory::None => "🗣️",
            InterventionCategory::Celebratory => "🎉",
            _ => "💡",
        };
        println!("{} Ruby: {}", marker, request.text);
        tokio::time::sleep(self.speaking_time(&request.text)).await;
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn show_text(&self, request: &UtteranceRequest) {
        println!("📝 {}", request.text);
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RunnerConfig::load().wrap_err("Failed to load configuration")?;
    init_tracing(&config.log_level);

    let lesson = config.load_lesson()?;
    let timeline = match &config.timeline_path {
        Some(path) => Timeline::load(path)?,
        None => Timeline { events: Vec::new() },
    };

    let mut session = LessonSession::new(lesson, config.session.clone())
        .wrap_err("Failed to create session")?;
    if let Some(templates) = config.templates.clone() {
        session = session.with_templates(templates);
    }

    tracing::info!(
        "🚀 Lesson runner starting session {} ({} timeline events)",
        session.id(),
        timeline.events.len()
    );

    let dispatcher = Arc::new(ConsoleDispatcher::new(config.words_per_minute));
    let handle = spawn_session(session, dispatcher, Arc::new(TokioClock::new()));
    let started = tokio::time::Instant::now();

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⏹️ Interrupted, abandoning session");
            cancel.cancel();
        }
    });

    for event in timeline.events {
        tokio::time::sleep_until(started + Duration::from_millis(event.at_ms)).await;
        if handle.is_finished() {
            break;
        }
        match event.action {
            TimelineAction::Sample(raw) => {
                if !handle.push_raw_sample(raw) {
                    tracing::debug!("Sample at {}ms not accepted", event.at_ms);
                }
            }
            TimelineAction::Response {
                text,
                pronunciation_score,
            } => {
                println!("🧒 Learner: {}", text);
                let mut response = UserResponseEvent::new(text, event.at_ms);
                if let Some(score) = pronunciation_score {
                    response = response.with_pronunciation(score);
                }
                if handle.respond(response).await.is_err() {
                    break;
                }
            }
            TimelineAction::StopSignals => handle.stop_signals().await?,
            TimelineAction::StartSignals => handle.start_signals().await?,
            TimelineAction::Abandon => {
                tracing::info!("⏹️ Timeline abandons the session at {}ms", event.at_ms);
                handle.abandon();
                break;
            }
        }
    }

    let status = handle.status();
    match handle.join().await.wrap_err("Session task failed")? {
        SessionEnd::Completed(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        SessionEnd::Abandoned => {
            tracing::warn!(
                "Session abandoned after {} exchanges ({} interventions)",
                status.exchanges,
                status.interventions
            );
        }
    }
    Ok(())
}

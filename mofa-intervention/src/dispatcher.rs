//! Output dispatcher abstraction
//!
//! The engine hands every utterance to an [`OutputDispatcher`]. Speech is the
//! primary channel; [`OutputDispatcher::show_text`] is the fallback used when
//! speech fails.

use crate::data::UtteranceRequest;
use crate::error::DispatchError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Speech/avatar output used by a session.
///
/// `speak` resolves once playback has finished (or failed). The engine never
/// calls it again before the previous call resolved.
#[async_trait::async_trait]
pub trait OutputDispatcher: Send + Sync {
    /// Speak the utterance and wait for playback to end
    async fn speak(&self, request: &UtteranceRequest) -> Result<(), DispatchError>;

    /// Whether the output device is still playing something
    fn is_busy(&self) -> bool {
        false
    }

    /// Show the utterance as text when speech is unavailable
    fn show_text(&self, request: &UtteranceRequest) {
        tracing::info!("📝 {}", request.text);
    }
}

// ============================================================================
// MOCK DISPATCHER (for testing)
// ============================================================================

/// Mock dispatcher for tests and dry runs.
///
/// Simulates playback with a tokio sleep, so it follows paused test time.
/// Records every request, in dispatch order.
#[derive(Debug, Default)]
pub struct MockDispatcher {
    latency: Duration,
    per_word: Duration,
    failures: Mutex<VecDeque<DispatchError>>,
    requests: Mutex<Vec<UtteranceRequest>>,
    shown: Mutex<Vec<UtteranceRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDispatcher {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Add playback time per spoken word
    pub fn with_per_word(mut self, per_word: Duration) -> Self {
        self.per_word = per_word;
        self
    }

    /// Make the next `speak` call fail with `error`
    pub fn fail_next(&self, error: DispatchError) {
        self.failures.lock().push_back(error);
    }

    /// All requests passed to `speak`, including failed ones
    pub fn requests(&self) -> Vec<UtteranceRequest> {
        self.requests.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.text.clone()).collect()
    }

    /// Requests that fell back to text
    pub fn shown(&self) -> Vec<UtteranceRequest> {
        self.shown.lock().clone()
    }

    /// Highest number of overlapping `speak` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn playback_time(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u32;
        self.latency + self.per_word * words
    }
}

#[async_trait::async_trait]
impl OutputDispatcher for MockDispatcher {
    async fn speak(&self, request: &UtteranceRequest) -> Result<(), DispatchError> {
        self.requests.lock().push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.playback_time(&request.text)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    fn show_text(&self, request: &UtteranceRequest) {
        self.shown.lock().push(request.clone());
    }
}

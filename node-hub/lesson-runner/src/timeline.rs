//! Scripted input timeline replayed against a session

use std::path::Path;

use eyre::WrapErr;
use mofa_intervention::RawEmotionSample;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Timeline {
    pub events: Vec<TimelineEvent>,
}

/// One input, `at_ms` after the session started
#[derive(Clone, Debug, Deserialize)]
pub struct TimelineEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: TimelineAction,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineAction {
    Sample(RawEmotionSample),
    Response {
        text: String,
        #[serde(default)]
        pronunciation_score: Option<u8>,
    },
    StopSignals,
    StartSignals,
    Abandon,
}

impl Timeline {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read timeline {}", path.display()))?;
        Self::parse(&raw).wrap_err_with(|| format!("Failed to parse timeline {}", path.display()))
    }

    /// Parse and order events by time
    pub fn parse(raw: &str) -> eyre::Result<Self> {
        let mut timeline: Timeline = serde_json::from_str(raw)?;
        timeline.events.sort_by_key(|e| e.at_ms);
        Ok(timeline)
    }
}

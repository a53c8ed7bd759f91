//! Data types exchanged between the engine and its collaborators
//!
//! - [`EmotionSample`] - one reading from the emotion/attention detector
//! - [`UserResponseEvent`] - a transcribed answer from the learner
//! - [`UtteranceRequest`] - text handed to the output dispatcher
//! - [`SessionOutcome`] - result handed to the progression collaborator

use crate::error::SampleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds on the session clock
pub type Millis = u64;

/// Emotion label reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
    Neutral,
}

impl EmotionLabel {
    /// Labels that count as negative affect
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            EmotionLabel::Angry
                | EmotionLabel::Sad
                | EmotionLabel::Fearful
                | EmotionLabel::Disgusted
        )
    }

    /// Labels that hint the learner is confused by the material
    pub fn is_confused(self) -> bool {
        matches!(self, EmotionLabel::Surprised | EmotionLabel::Fearful)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgusted => "disgusted",
            EmotionLabel::Surprised => "surprised",
            EmotionLabel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = SampleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "happy" => Ok(EmotionLabel::Happy),
            "sad" => Ok(EmotionLabel::Sad),
            "angry" => Ok(EmotionLabel::Angry),
            "fearful" => Ok(EmotionLabel::Fearful),
            "disgusted" => Ok(EmotionLabel::Disgusted),
            "surprised" => Ok(EmotionLabel::Surprised),
            "neutral" => Ok(EmotionLabel::Neutral),
            other => Err(SampleError::UnknownLabel(other.to_string())),
        }
    }
}

/// One timestamped reading from the detector. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEmotionSample")]
pub struct EmotionSample {
    pub timestamp: Millis,
    pub emotion_label: EmotionLabel,
    pub confidence: f64,
    pub is_gaze_on_screen: bool,
}

impl EmotionSample {
    /// Build a sample, rejecting confidence outside [0, 1]
    pub fn new(
        timestamp: Millis,
        emotion_label: EmotionLabel,
        confidence: f64,
        is_gaze_on_screen: bool,
    ) -> Result<Self, SampleError> {
        let sample = Self {
            timestamp,
            emotion_label,
            confidence,
            is_gaze_on_screen,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Check the confidence range (NaN is out of range)
    pub fn validate(&self) -> Result<(), SampleError> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(SampleError::ConfidenceOutOfRange(self.confidence))
        }
    }
}

/// Wire form of a sample as delivered by the detector subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEmotionSample {
    pub timestamp: Millis,
    pub emotion_label: String,
    pub confidence: f64,
    #[serde(default = "default_gaze")]
    pub is_gaze_on_screen: bool,
}

fn default_gaze() -> bool {
    true
}

impl TryFrom<RawEmotionSample> for EmotionSample {
    type Error = SampleError;

    fn try_from(raw: RawEmotionSample) -> Result<Self, Self::Error> {
        let label = raw.emotion_label.parse::<EmotionLabel>()?;
        EmotionSample::new(raw.timestamp, label, raw.confidence, raw.is_gaze_on_screen)
    }
}

/// A transcribed learner answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponseEvent {
    pub text: String,
    /// Pronunciation score in 0..=100, when the speech pipeline produced one
    #[serde(default)]
    pub pronunciation_score: Option<u8>,
    pub timestamp: Millis,
}

impl UserResponseEvent {
    pub fn new(text: impl Into<String>, timestamp: Millis) -> Self {
        Self {
            text: text.into(),
            pronunciation_score: None,
            timestamp,
        }
    }

    pub fn with_pronunciation(mut self, score: u8) -> Self {
        self.pronunciation_score = Some(score.min(100));
        self
    }
}

/// Priority attached to an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    Normal,
}

/// Why the engine decided to speak up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterventionCategory {
    UrgentNegative,
    Celebratory,
    LowEngagement,
    StrugglingPattern,
    None,
}

/// Output of the intervention policy for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterventionDecision {
    pub should_intervene: bool,
    pub category: InterventionCategory,
    pub priority: Priority,
}

impl InterventionDecision {
    /// Decision to stay quiet
    pub fn hold() -> Self {
        Self {
            should_intervene: false,
            category: InterventionCategory::None,
            priority: Priority::Normal,
        }
    }

    pub fn urgent(category: InterventionCategory) -> Self {
        Self {
            should_intervene: true,
            category,
            priority: Priority::Urgent,
        }
    }

    pub fn normal(category: InterventionCategory) -> Self {
        Self {
            should_intervene: true,
            category,
            priority: Priority::Normal,
        }
    }
}

/// Which part of the session produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UtteranceKind {
    Greeting,
    Goal,
    Question,
    /// Nudge number (1 or 2) for the active question
    Nudge(u8),
    Feedback,
    Intervention,
    Closing,
}

impl UtteranceKind {
    /// Scripted utterances belong to the turn machine and wait for the speaker;
    /// interventions are dropped instead of queued.
    pub fn is_scripted(self) -> bool {
        !matches!(self, UtteranceKind::Intervention)
    }
}

/// Text handed to the output dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtteranceRequest {
    pub text: String,
    pub category: InterventionCategory,
    pub priority: Priority,
}

impl UtteranceRequest {
    /// A scripted turn utterance (not an intervention)
    pub fn scripted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: InterventionCategory::None,
            priority: Priority::Normal,
        }
    }
}

/// Result of a completed lesson, consumed by the progression collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub total_exchanges: u32,
    pub correct_count: u32,
    /// 0..=100, never below the configured floor
    pub final_score: u8,
    pub xp_earned: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_is_case_insensitive() {
        assert_eq!("Angry".parse::<EmotionLabel>().unwrap(), EmotionLabel::Angry);
        assert_eq!(" neutral ".parse::<EmotionLabel>().unwrap(), EmotionLabel::Neutral);
        assert!(matches!(
            "bored".parse::<EmotionLabel>(),
            Err(SampleError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_raw_sample_conversion_rejects_bad_confidence() {
        let raw = RawEmotionSample {
            timestamp: 10,
            emotion_label: "happy".into(),
            confidence: 1.4,
            is_gaze_on_screen: true,
        };
        assert!(EmotionSample::try_from(raw).is_err());

        let raw = RawEmotionSample {
            timestamp: 10,
            emotion_label: "sad".into(),
            confidence: f64::NAN,
            is_gaze_on_screen: true,
        };
        assert!(EmotionSample::try_from(raw).is_err());
    }

    #[test]
    fn test_raw_sample_from_json() {
        let raw: RawEmotionSample = serde_json::from_str(
            r#"{"timestamp": 2000, "emotion_label": "surprised", "confidence": 0.6}"#,
        )
        .unwrap();
        let sample = EmotionSample::try_from(raw).unwrap();
        assert_eq!(sample.emotion_label, EmotionLabel::Surprised);
        assert!(sample.is_gaze_on_screen);
    }

    #[test]
    fn test_sample_deserialization_validates() {
        let sample: EmotionSample = serde_json::from_str(
            r#"{"timestamp": 500, "emotion_label": "happy", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(sample.emotion_label, EmotionLabel::Happy);

        let out_of_range = r#"{"timestamp": 500, "emotion_label": "happy", "confidence": 1.5}"#;
        assert!(serde_json::from_str::<EmotionSample>(out_of_range).is_err());
        let unknown = r#"{"timestamp": 500, "emotion_label": "bored", "confidence": 0.5}"#;
        assert!(serde_json::from_str::<EmotionSample>(unknown).is_err());

        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(serde_json::from_str::<EmotionSample>(&json).unwrap(), sample);
    }

    #[test]
    fn test_negative_labels() {
        let negative: Vec<_> = [
            EmotionLabel::Happy,
            EmotionLabel::Sad,
            EmotionLabel::Angry,
            EmotionLabel::Fearful,
            EmotionLabel::Disgusted,
            EmotionLabel::Surprised,
            EmotionLabel::Neutral,
        ]
        .into_iter()
        .filter(|l| l.is_negative())
        .collect();
        assert_eq!(
            negative,
            vec![
                EmotionLabel::Sad,
                EmotionLabel::Angry,
                EmotionLabel::Fearful,
                EmotionLabel::Disgusted
            ]
        );
    }
}

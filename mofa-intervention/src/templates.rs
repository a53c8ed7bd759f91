//! Intervention message templates
//!
//! Each intervention category has its own pool. Selection skips the template used
//! immediately before, and falls back to a generic per-category line when nothing
//! is left to choose from.
//!
//! Placeholders:
//! - `{name}` - learner name from the lesson
//! - `{emotion}` - label of the sample that triggered the intervention

use crate::data::{EmotionSample, InterventionCategory};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

/// One selectable message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageTemplate {
    pub id: String,
    pub text: String,
}

impl MessageTemplate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Template pools, one per category
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateLibrary {
    pub urgent_negative: Vec<MessageTemplate>,
    pub celebratory: Vec<MessageTemplate>,
    pub low_engagement: Vec<MessageTemplate>,
    pub struggling_pattern: Vec<MessageTemplate>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self {
            urgent_negative: vec![
                MessageTemplate::new(
                    "urgent-1",
                    "It's okay to feel {emotion}, {name}. Let's take a deep breath together.",
                ),
                MessageTemplate::new(
                    "urgent-2",
                    "Hey {name}, new things can be tricky. You're doing great just by trying!",
                ),
                MessageTemplate::new(
                    "urgent-3",
                    "No rush at all, {name}. We can go as slowly as you like.",
                ),
            ],
            celebratory: vec![
                MessageTemplate::new(
                    "celebrate-1",
                    "I love that smile, {name}! You're having fun!",
                ),
                MessageTemplate::new("celebrate-2", "You look so happy! Great energy, {name}!"),
                MessageTemplate::new("celebrate-3", "Your smile makes practicing even better!"),
            ],
            low_engagement: vec![
                MessageTemplate::new(
                    "attention-1",
                    "{name}, are you still with me? Look here, I have something fun!",
                ),
                MessageTemplate::new(
                    "attention-2",
                    "Peek-a-boo, {name}! Let's keep going together.",
                ),
                MessageTemplate::new(
                    "attention-3",
                    "I'm right here, {name}. Ready for the next part?",
                ),
            ],
            struggling_pattern: vec![
                MessageTemplate::new(
                    "pattern-1",
                    "This one is a bit tricky. Want me to say it again more slowly?",
                ),
                MessageTemplate::new(
                    "pattern-2",
                    "You're working really hard, {name}. Let's try it in smaller steps.",
                ),
                MessageTemplate::new(
                    "pattern-3",
                    "It's fine to take your time. I'll help you with the first word.",
                ),
            ],
        }
    }
}

impl TemplateLibrary {
    /// Pool for a category; `None` has no pool
    pub fn pool(&self, category: InterventionCategory) -> &[MessageTemplate] {
        match category {
            InterventionCategory::UrgentNegative => &self.urgent_negative,
            InterventionCategory::Celebratory => &self.celebratory,
            InterventionCategory::LowEngagement => &self.low_engagement,
            InterventionCategory::StrugglingPattern => &self.struggling_pattern,
            InterventionCategory::None => &[],
        }
    }

    /// Pick a template, never repeating `last_id`
    pub fn select<R: Rng + ?Sized>(
        &self,
        category: InterventionCategory,
        last_id: Option<&str>,
        rng: &mut R,
    ) -> Option<&MessageTemplate> {
        let candidates: Vec<&MessageTemplate> = self
            .pool(category)
            .iter()
            .filter(|t| Some(t.id.as_str()) != last_id)
            .collect();
        candidates.choose(rng).copied()
    }
}

/// Line spoken when a category pool has nothing selectable
pub fn generic_message(category: InterventionCategory) -> Option<&'static str> {
    match category {
        InterventionCategory::UrgentNegative => {
            Some("I'm here with you. Let's take a little break.")
        }
        InterventionCategory::Celebratory => Some("You're doing wonderfully!"),
        InterventionCategory::LowEngagement => Some("Let's look back at the screen together."),
        InterventionCategory::StrugglingPattern => Some("Let's try that together, step by step."),
        InterventionCategory::None => None,
    }
}

/// A rendered intervention message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltMessage {
    pub text: String,
    /// Template used, `None` for the generic fallback
    pub template_id: Option<String>,
}

/// Build the message for `category` from the triggering sample.
///
/// Returns `None` only for [`InterventionCategory::None`].
pub fn build_intervention<R: Rng + ?Sized>(
    library: &TemplateLibrary,
    category: InterventionCategory,
    trigger: Option<&EmotionSample>,
    learner_name: &str,
    last_id: Option<&str>,
    rng: &mut R,
) -> Option<BuiltMessage> {
    let emotion = trigger
        .map(|s| s.emotion_label.as_str())
        .unwrap_or("this way");
    match library.select(category, last_id, rng) {
        Some(template) => Some(BuiltMessage {
            text: render(&template.text, learner_name, emotion),
            template_id: Some(template.id.clone()),
        }),
        None => generic_message(category).map(|text| BuiltMessage {
            text: text.to_string(),
            template_id: None,
        }),
    }
}

fn render(text: &str, learner_name: &str, emotion: &str) -> String {
    let name = if learner_name.trim().is_empty() { "friend" } else { learner_name };
    text.replace("{name}", name).replace("{emotion}", emotion)
}

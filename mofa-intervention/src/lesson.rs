//! Lesson content and answer matching

use crate::error::{EngineError, EngineResult};
use serde::Deserialize;

/// A question the learner should answer out loud
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    pub prompt: String,
    /// Accepted answers, matched case-insensitively by keyword/substring
    pub expected_responses: Vec<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl Question {
    pub fn new(prompt: impl Into<String>, expected: &[&str]) -> Self {
        Self {
            prompt: prompt.into(),
            expected_responses: expected.iter().map(|e| e.to_string()).collect(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Static lesson content supplied by the content collaborator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub learner_name: String,
    pub greeting: String,
    pub goal: String,
    pub questions: Vec<Question>,
}

impl Lesson {
    pub fn validate(&self) -> EngineResult<()> {
        if self.questions.is_empty() {
            return Err(EngineError::InvalidLesson(format!(
                "lesson '{}' has no questions",
                self.id
            )));
        }
        for (index, question) in self.questions.iter().enumerate() {
            let has_answer = question
                .expected_responses
                .iter()
                .any(|e| !normalize(e).is_empty());
            if !has_answer {
                return Err(EngineError::InvalidLesson(format!(
                    "question {} of lesson '{}' has no expected responses",
                    index, self.id
                )));
            }
        }
        Ok(())
    }
}

/// How a response compares against a question's expected set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Correct,
    Incorrect,
    /// Nothing recognisable was said
    Ambiguous,
}

impl MatchResult {
    pub fn is_correct(self) -> bool {
        matches!(self, MatchResult::Correct)
    }
}

/// Lowercase, replace punctuation with spaces, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Match `response` against `expected`.
///
/// An expected phrase matches when it appears in the response (on word boundaries),
/// or when every keyword of a multi-word phrase appears somewhere in the response.
pub fn match_response(response: &str, expected: &[String]) -> MatchResult {
    let said = normalize(response);
    if said.is_empty() {
        return MatchResult::Ambiguous;
    }
    let padded = format!(" {} ", said);
    let words: Vec<&str> = said.split(' ').collect();

    for phrase in expected {
        let phrase = normalize(phrase);
        if phrase.is_empty() {
            continue;
        }
        if padded.contains(&format!(" {} ", phrase)) {
            return MatchResult::Correct;
        }
        let keywords: Vec<&str> = phrase.split(' ').collect();
        if keywords.len() > 1 && keywords.iter().all(|k| words.contains(k)) {
            return MatchResult::Correct;
        }
    }
    MatchResult::Incorrect
}

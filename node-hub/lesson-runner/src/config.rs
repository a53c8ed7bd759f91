use std::path::{Path, PathBuf};

use eyre::WrapErr;
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use mofa_intervention::{Lesson, SessionConfig, TemplateLibrary};
use serde::Deserialize;

/// Runner configuration.
///
/// Loaded from a TOML/YAML/JSON file and `LESSON_`-prefixed environment variables.
/// Nested session keys use a double underscore, e.g. `LESSON_SESSION__COOLDOWN_MS`.
#[derive(Clone, Debug, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_lesson_path")]
    pub lesson_path: PathBuf,
    /// Scripted detector/recognizer events; without one the session only nudges
    pub timeline_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Simulated speaking rate of the console voice
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,
    #[serde(default)]
    pub session: SessionConfig,
    /// Replaces the built-in template pools; missing categories keep the defaults
    pub templates: Option<TemplateLibrary>,
}

fn default_lesson_path() -> PathBuf {
    PathBuf::from("lesson.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_words_per_minute() -> u32 {
    150
}

impl RunnerConfig {
    /// Load configuration from the file named by LESSON_RUNNER_CONFIG.
    ///
    /// Falls back to `lesson_runner.toml`; a missing file leaves defaults plus env.
    pub fn load() -> eyre::Result<Self> {
        let config_file = std::env::var("LESSON_RUNNER_CONFIG")
            .unwrap_or_else(|_| "lesson_runner.toml".to_string());
        Self::load_from(Path::new(&config_file))
    }

    pub fn load_from(config_path: &Path) -> eyre::Result<Self> {
        let figment = if config_path.exists() {
            match config_path.extension().and_then(|s| s.to_str()) {
                Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(config_path)),
                Some("json") => Figment::new().merge(Json::file(config_path)),
                _ => Figment::new().merge(Toml::file(config_path)),
            }
        } else {
            Figment::new()
        };

        let config: RunnerConfig = figment
            .merge(Env::prefixed("LESSON_").split("__"))
            .extract()
            .wrap_err_with(|| format!("Invalid runner config {}", config_path.display()))?;
        Ok(config)
    }

    /// Read and validate the lesson file
    pub fn load_lesson(&self) -> eyre::Result<Lesson> {
        let raw = std::fs::read_to_string(&self.lesson_path)
            .wrap_err_with(|| format!("Failed to read lesson {}", self.lesson_path.display()))?;
        let lesson: Lesson = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("Failed to parse lesson {}", self.lesson_path.display()))?;
        lesson.validate()?;
        Ok(lesson)
    }
}

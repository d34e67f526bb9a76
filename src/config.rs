//! Application-level configuration loading: quiz timings, sync cadence and file locations.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::question_bank::QuestionBank;

/// Default location on disk where the device looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/quiz.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PARTY_QUIZ_CONFIG_PATH";
const DEFAULT_IDENTITY_PATH: &str = "data/device.json";

/// Fixed delays of the quiz flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizTimings {
    /// Intro card duration before the host opens the first question of a round.
    pub intro_delay: Duration,
    /// Delay between entering a question and showing its options.
    pub options_delay: Duration,
    /// Countdown of text and picture questions.
    pub question_duration: Duration,
    /// Countdown of audio questions.
    pub audio_question_duration: Duration,
    /// Pause between everyone having answered and the reveal.
    pub all_answered_delay: Duration,
    /// Pause between countdown expiry and the reveal.
    pub expiry_grace: Duration,
}

impl Default for QuizTimings {
    fn default() -> Self {
        Self {
            intro_delay: Duration::from_millis(5000),
            options_delay: Duration::from_millis(2000),
            question_duration: Duration::from_secs(15),
            audio_question_duration: Duration::from_secs(30),
            all_answered_delay: Duration::from_millis(1000),
            expiry_grace: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Quiz flow delays.
    pub timings: QuizTimings,
    /// Period of the safety-net poll of the sync client.
    pub poll_interval: Duration,
    /// Where the local device identity is persisted.
    pub identity_path: PathBuf,
    /// Optional question bank file; the built-in bank is used when unset.
    pub question_bank_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        poll_interval_ms = app_config.poll_interval.as_millis() as u64,
                        "loaded quiz config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Load the configured question bank, or the built-in one.
    ///
    /// An unreadable or invalid bank file is logged and replaced by the built-in bank.
    pub fn question_bank(&self) -> QuestionBank {
        let Some(path) = &self.question_bank_path else {
            return QuestionBank::builtin();
        };
        match QuestionBank::load(path) {
            Ok(bank) => {
                info!(
                    path = %path.display(),
                    rounds = bank.round_count(),
                    "loaded question bank"
                );
                bank
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load question bank; using built-in questions"
                );
                QuestionBank::builtin()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_interval_ms: u64,
    intro_delay_ms: u64,
    options_delay_ms: u64,
    question_secs: u64,
    audio_question_secs: u64,
    all_answered_delay_ms: u64,
    expiry_grace_ms: u64,
    identity_path: PathBuf,
    question_bank_path: Option<PathBuf>,
}

impl Default for RawConfig {
    fn default() -> Self {
        let timings = QuizTimings::default();
        Self {
            poll_interval_ms: 1000,
            intro_delay_ms: timings.intro_delay.as_millis() as u64,
            options_delay_ms: timings.options_delay.as_millis() as u64,
            question_secs: timings.question_duration.as_secs(),
            audio_question_secs: timings.audio_question_duration.as_secs(),
            all_answered_delay_ms: timings.all_answered_delay.as_millis() as u64,
            expiry_grace_ms: timings.expiry_grace.as_millis() as u64,
            identity_path: PathBuf::from(DEFAULT_IDENTITY_PATH),
            question_bank_path: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            timings: QuizTimings {
                intro_delay: Duration::from_millis(value.intro_delay_ms),
                options_delay: Duration::from_millis(value.options_delay_ms),
                question_duration: Duration::from_secs(value.question_secs.max(1)),
                audio_question_duration: Duration::from_secs(value.audio_question_secs.max(1)),
                all_answered_delay: Duration::from_millis(value.all_answered_delay_ms),
                expiry_grace: Duration::from_millis(value.expiry_grace_ms),
            },
            poll_interval: Duration::from_millis(value.poll_interval_ms.max(1)),
            identity_path: value.identity_path,
            question_bank_path: value.question_bank_path,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_keep_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"poll_interval_ms": 250}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.timings, QuizTimings::default());
        assert_eq!(config.identity_path, PathBuf::from(DEFAULT_IDENTITY_PATH));
    }

    #[test]
    fn zero_durations_are_clamped() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 0, "question_secs": 0}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.timings.question_duration, Duration::from_secs(1));
    }

    #[test]
    fn broken_bank_path_falls_back_to_builtin() {
        let config = AppConfig {
            question_bank_path: Some(PathBuf::from("does/not/exist.json")),
            ..AppConfig::default()
        };
        assert_eq!(config.question_bank(), QuestionBank::builtin());
    }
}

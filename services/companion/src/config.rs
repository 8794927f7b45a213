//! Application Configuration Module
//!
//! Loads the companion's settings from environment variables (and a `.env`
//! file when present), then lets command-line flags override the timing knobs.

use companion_core::correlator::{CorrelatorConfig, DEFAULT_SETTLE_DELAY, DEFAULT_WINDOW};
use companion_core::queue::{DEFAULT_CHAT_CAPACITY, DEFAULT_SPEECH_CAPACITY, DEFAULT_STATE_CAPACITY};
use companion_core::scheduler::{
    DEFAULT_INTERVAL, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_TICK_TIMEOUT, OverlapPolicy,
    SchedulerConfig,
};
use companion_core::turn::{
    DEFAULT_CHAT_HEADER, DEFAULT_FALLBACK_PROMPT, DEFAULT_HISTORY_HEADER, DEFAULT_SPEECH_HEADER,
    DEFAULT_STATE_HEADER, PromptSettings,
};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Default `STATE_MAX`; an explicit zero falls back to the queue default instead.
pub const DEFAULT_STATE_MAX: usize = 3;
pub const DEFAULT_ROTATE_EACH: u32 = 3;
pub const DEFAULT_MAX_HISTORY_RECORDS: usize = 10;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_ASSISTANT_PROMPT: &str =
    "You are the player's sidekick and comment on what is happening in the game.";

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,

    pub interval: Duration,
    pub tick_timeout: Duration,
    pub overlap: OverlapPolicy,
    pub max_consecutive_errors: u32,
    pub early_wake: bool,

    pub correlator_window: Duration,
    pub settle_delay: Duration,

    pub speech_capacity: usize,
    pub chat_capacity: usize,
    pub state_capacity: usize,

    pub speech_header: String,
    pub history_header: String,
    pub state_header: String,
    pub chat_header: String,
    pub fallback_prompts: Vec<String>,
    pub assistant_prompt: String,
    pub characters_dir: PathBuf,
    pub rotate_each: u32,
    pub max_history_records: usize,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidNumber { name: String, value: String },
    #[error("Invalid boolean for {name}: {value}")]
    InvalidBool { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `TIMER_INTERVAL_SECONDS`: (Optional) Base tick interval. Defaults to 10.
    // *   `TICK_TIMEOUT_SECONDS`: (Optional) Per-turn timeout. Defaults to 60.
    // *   `OVERLAP_POLICY`: (Optional) "skip" or "preempt". Defaults to "skip".
    // *   `MAX_CONSECUTIVE_ERRORS`: (Optional) Failed ticks in a row before stopping. Defaults to 3.
    // *   `ENABLE_EARLY_TICK`: (Optional) Tick early when speech arrives. Defaults to true.
    // *   `STT_HANDY_WINDOW_MS` / `STT_HOTKEY_DELAY_MS`: (Optional) Correlator window and settle delay.
    // *   `OPENAI_API_KEY`: (Optional) Without it the stub responder is used.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source, so parsing can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let log_level_str = vars.get("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let interval_secs: u64 = vars.number("TIMER_INTERVAL_SECONDS", DEFAULT_INTERVAL.as_secs())?;
        let timeout_secs: u64 = vars.number("TICK_TIMEOUT_SECONDS", DEFAULT_TICK_TIMEOUT.as_secs())?;

        // Unknown policies fall back to skip rather than refusing to start.
        let overlap = match vars.get("OVERLAP_POLICY") {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}, using skip", e);
                OverlapPolicy::Skip
            }),
            None => OverlapPolicy::Skip,
        };

        let window_ms: u64 = vars.number("STT_HANDY_WINDOW_MS", DEFAULT_WINDOW.as_millis() as u64)?;
        let delay_ms: u64 = vars.number("STT_HOTKEY_DELAY_MS", DEFAULT_SETTLE_DELAY.as_millis() as u64)?;

        Ok(Self {
            openai_api_key: vars.get("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            chat_model: vars.text("CHAT_MODEL", DEFAULT_CHAT_MODEL),
            log_level,
            interval: Duration::from_secs(interval_secs),
            tick_timeout: Duration::from_secs(timeout_secs),
            overlap,
            max_consecutive_errors: vars.number("MAX_CONSECUTIVE_ERRORS", DEFAULT_MAX_CONSECUTIVE_ERRORS)?,
            early_wake: vars.flag("ENABLE_EARLY_TICK", true)?,
            correlator_window: Duration::from_millis(window_ms),
            settle_delay: Duration::from_millis(delay_ms),
            speech_capacity: or_default(vars.number("SPEECH_MAX", DEFAULT_SPEECH_CAPACITY)?, DEFAULT_SPEECH_CAPACITY),
            chat_capacity: or_default(vars.number("CHAT_MAX", DEFAULT_CHAT_CAPACITY)?, DEFAULT_CHAT_CAPACITY),
            state_capacity: or_default(vars.number("STATE_MAX", DEFAULT_STATE_MAX)?, DEFAULT_STATE_CAPACITY),
            speech_header: vars.text("SPEECH_HEADER", DEFAULT_SPEECH_HEADER),
            history_header: vars.text("HISTORY_HEADER", DEFAULT_HISTORY_HEADER),
            state_header: vars.text("STATE_HEADER", DEFAULT_STATE_HEADER),
            chat_header: vars.text("CHAT_HISTORY_HEADER", DEFAULT_CHAT_HEADER),
            fallback_prompts: parse_list(
                &vars.get("SPEECH_PROMPT").unwrap_or_default(),
                DEFAULT_FALLBACK_PROMPT,
            ),
            assistant_prompt: vars.text("ASSISTANT_PROMPT", DEFAULT_ASSISTANT_PROMPT),
            characters_dir: PathBuf::from(vars.text("CHARACTERS_DIR", "characters")),
            rotate_each: vars.number("ROTATE_CONVERSATION_EACH", DEFAULT_ROTATE_EACH)?,
            max_history_records: vars.number("MAX_HISTORY_RECORDS", DEFAULT_MAX_HISTORY_RECORDS)?,
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::builder()
            .with_interval(self.interval)
            .with_tick_timeout(self.tick_timeout)
            .with_overlap(self.overlap)
            .with_max_consecutive_errors(self.max_consecutive_errors)
            .with_early_wake(self.early_wake)
            .build()
    }

    pub fn correlator(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            window: self.correlator_window,
            settle_delay: self.settle_delay,
        }
    }

    pub fn prompts(&self, characters: Vec<String>) -> PromptSettings {
        PromptSettings {
            speech_header: self.speech_header.clone(),
            history_header: self.history_header.clone(),
            state_header: self.state_header.clone(),
            chat_header: self.chat_header.clone(),
            fallback_prompts: self.fallback_prompts.clone(),
            assistant_prompt: self.assistant_prompt.clone(),
            characters,
            rotate_each: self.rotate_each,
            max_history_records: self.max_history_records,
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn text(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Parses straight into the target type, so out-of-range values are
    /// rejected instead of truncated.
    fn number<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Some(value) if value.trim().is_empty() => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    name: name.to_string(),
                    value,
                }),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::InvalidBool {
                name: name.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

/// Splits a `;`-separated list, trimming entries and dropping empty ones.
pub fn parse_list(value: &str, default: &str) -> Vec<String> {
    let items: Vec<String> = value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        vec![default.to_string()]
    } else {
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::scheduler::FALLBACK_TICK_TIMEOUT;
    use std::collections::HashMap;

    #[test]
    fn test_parse_list_trims_and_drops_empty() {
        assert_eq!(
            parse_list(" report status ; ;what do you see;", "x"),
            vec!["report status", "what do you see"]
        );
        assert_eq!(parse_list("", "fallback"), vec!["fallback"]);
        assert_eq!(parse_list(" ; ", "fallback"), vec!["fallback"]);
    }

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_or_default_replaces_zero() {
        assert_eq!(or_default(0, 30), 30);
        assert_eq!(or_default(5, 30), 5);
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_any_variables() {
        let config = load(&[]).unwrap();

        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.tick_timeout, DEFAULT_TICK_TIMEOUT);
        assert_eq!(config.overlap, OverlapPolicy::Skip);
        assert_eq!(config.max_consecutive_errors, 3);
        assert!(config.early_wake);
        assert_eq!(config.state_capacity, DEFAULT_STATE_MAX);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_non_numeric_value_is_rejected() {
        let err = load(&[("TIMER_INTERVAL_SECONDS", "ten")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { ref name, ref value }
                if name == "TIMER_INTERVAL_SECONDS" && value == "ten"
        ));
    }

    #[test]
    fn test_out_of_range_value_is_rejected_not_truncated() {
        let err = load(&[("MAX_CONSECUTIVE_ERRORS", "4294967296")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { ref name, .. } if name == "MAX_CONSECUTIVE_ERRORS"));

        let err = load(&[("ROTATE_CONVERSATION_EACH", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn test_unknown_overlap_policy_falls_back_to_skip() {
        let config = load(&[("OVERLAP_POLICY", "interrupt")]).unwrap();
        assert_eq!(config.overlap, OverlapPolicy::Skip);

        let config = load(&[("OVERLAP_POLICY", " Preempt ")]).unwrap();
        assert_eq!(config.overlap, OverlapPolicy::Preempt);
    }

    #[test]
    fn test_zero_capacity_falls_back_to_queue_default() {
        let config = load(&[("STATE_MAX", "0"), ("CHAT_MAX", "0"), ("SPEECH_MAX", "4")]).unwrap();
        assert_eq!(config.state_capacity, DEFAULT_STATE_CAPACITY);
        assert_eq!(config.chat_capacity, DEFAULT_CHAT_CAPACITY);
        assert_eq!(config.speech_capacity, 4);
    }

    #[test]
    fn test_bad_boolean_is_rejected() {
        let err = load(&[("ENABLE_EARLY_TICK", "sometimes")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { ref name, .. } if name == "ENABLE_EARLY_TICK"));

        let config = load(&[("ENABLE_EARLY_TICK", "off")]).unwrap();
        assert!(!config.early_wake);
    }

    #[test]
    fn test_zero_timeout_is_normalized_by_scheduler_config() {
        let config = load(&[("TICK_TIMEOUT_SECONDS", "0"), ("TIMER_INTERVAL_SECONDS", "0")]).unwrap();
        let scheduler = config.scheduler();
        assert_eq!(scheduler.tick_timeout(), FALLBACK_TICK_TIMEOUT);
        assert_eq!(scheduler.interval(), DEFAULT_INTERVAL);
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let err = load(&[("RUST_LOG", "chatty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(ref level) if level == "chatty"));
    }
}

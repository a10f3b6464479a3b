//! Application-level configuration loading: gameplay rules, timing and seeded identities.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/arena.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARENA_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Minimum roster size required to start a quiz (never below 1).
    pub min_players: usize,
    /// Roster size beyond which joins are refused.
    pub max_players: usize,
    /// Points awarded for a correct answer.
    pub points_per_correct: u32,
    /// Countdown length of each question.
    pub question_duration_secs: u64,
    /// Gap after which a silent host is considered absent.
    pub host_timeout_secs: u64,
    /// Minimum spacing between two heartbeat writes by the same host.
    pub heartbeat_interval_secs: u64,
    /// Client-side bound on a single answer submission round-trip.
    pub submission_timeout_ms: u64,
    pub room_code_length: usize,
    /// How many random codes discovery tries before giving up.
    pub room_code_attempts: usize,
    /// How many compare-and-set rounds a mutation retries before reporting a conflict.
    pub write_attempts: usize,
    pub feed: FeedConfig,
    /// Bearer tokens accepted by the built-in verifier, mapped to caller ids.
    pub tokens: HashMap<String, String>,
}

/// Retry policy of the change-feed adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// A subscription without updates for this long reports unhealthy.
    pub stale_after_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_players: 1,
            max_players: 50,
            points_per_correct: 10,
            question_duration_secs: 30,
            host_timeout_secs: 60,
            heartbeat_interval_secs: 15,
            submission_timeout_ms: 8_000,
            room_code_length: 6,
            room_code_attempts: 10,
            write_attempts: 8,
            feed: FeedConfig::default(),
            tokens: HashMap::new(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 5,
            stale_after_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    let config = config.normalized();
                    info!(
                        path = %path.display(),
                        tokens = config.tokens.len(),
                        min_players = config.min_players,
                        "loaded arena configuration"
                    );
                    config
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

    /// Clamp values that would break invariants if taken literally.
    fn normalized(mut self) -> Self {
        self.min_players = self.min_players.max(1);
        self.max_players = self.max_players.max(self.min_players);
        self.room_code_length = self.room_code_length.max(4);
        self.room_code_attempts = self.room_code_attempts.max(1);
        self.write_attempts = self.write_attempts.max(1);
        self.feed.max_attempts = self.feed.max_attempts.max(1);
        self
    }

    pub fn question_duration(&self) -> Duration {
        Duration::from_secs(self.question_duration_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }
}

impl FeedConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

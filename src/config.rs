//! Runtime configuration: queue and channel names, timings and feature switches.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/arena.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARENA_BACK_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Channel every process subscribes to for lobby-level events.
    pub global_channel: String,
    /// Queue carrying durable store mutations.
    pub db_queue: String,
    /// Queue carrying deferred joins and disconnect cleanups.
    pub game_queue: String,
    /// Age after which a claimed task is considered stalled.
    pub claim_timeout: Duration,
    /// Period of the stalled-task sweep.
    pub retry_interval: Duration,
    /// Deliveries allowed before a task is dead-lettered.
    pub max_task_attempts: u32,
    /// Sleep between two claims on an empty queue.
    pub poll_interval: Duration,
    pub game_type_ttl: Duration,
    pub balance_ttl: Duration,
    pub started_game_ttl: Duration,
    pub staging_lock_ttl: Duration,
    pub staging_lock_attempts: u32,
    /// Capacity of each session's outbound message channel.
    pub outbound_buffer: usize,
    /// Defer `join-random-game` to the game queue instead of matching inline.
    pub queue_joins: bool,
    /// Refuse new joins while set.
    pub maintenance: bool,
    /// Append-only file receiving ledger failures.
    pub reconciliation_log: PathBuf,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
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

    /// Parse a JSON document; absent keys keep their default value.
    pub fn from_json_str(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Processing list paired with `queue`.
    pub fn processing_list(queue: &str) -> String {
        format!("{queue}:processing")
    }

    /// Dead-letter list paired with `queue`.
    pub fn dead_list(queue: &str) -> String {
        format!("{queue}:dead")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    global_channel: String,
    db_queue: String,
    game_queue: String,
    claim_timeout_secs: u64,
    retry_interval_secs: u64,
    max_task_attempts: u32,
    poll_interval_ms: u64,
    game_type_ttl_secs: u64,
    balance_ttl_secs: u64,
    started_game_ttl_secs: u64,
    staging_lock_ttl_ms: u64,
    staging_lock_attempts: u32,
    outbound_buffer: usize,
    queue_joins: bool,
    maintenance: bool,
    reconciliation_log: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            global_channel: "arena-global".into(),
            db_queue: "arena-db-queue".into(),
            game_queue: "arena-game-queue".into(),
            claim_timeout_secs: 10,
            retry_interval_secs: 3600,
            max_task_attempts: 24,
            poll_interval_ms: 250,
            game_type_ttl_secs: 60,
            balance_ttl_secs: 86_400,
            started_game_ttl_secs: 86_400,
            staging_lock_ttl_ms: 5000,
            staging_lock_attempts: 100,
            outbound_buffer: 64,
            queue_joins: true,
            maintenance: false,
            reconciliation_log: "errors.jsonl".into(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            global_channel: value.global_channel,
            db_queue: value.db_queue,
            game_queue: value.game_queue,
            claim_timeout: Duration::from_secs(value.claim_timeout_secs),
            retry_interval: Duration::from_secs(value.retry_interval_secs.max(1)),
            max_task_attempts: value.max_task_attempts.max(1),
            poll_interval: Duration::from_millis(value.poll_interval_ms.max(1)),
            game_type_ttl: Duration::from_secs(value.game_type_ttl_secs),
            balance_ttl: Duration::from_secs(value.balance_ttl_secs.max(1)),
            started_game_ttl: Duration::from_secs(value.started_game_ttl_secs.max(1)),
            staging_lock_ttl: Duration::from_millis(value.staging_lock_ttl_ms.max(1)),
            staging_lock_attempts: value.staging_lock_attempts.max(1),
            outbound_buffer: value.outbound_buffer.max(1),
            queue_joins: value.queue_joins,
            maintenance: value.maintenance,
            reconciliation_log: PathBuf::from(value.reconciliation_log),
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
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.global_channel, "arena-global");
        assert_eq!(config.game_type_ttl, Duration::from_secs(60));
        assert!(config.queue_joins);
    }

    #[test]
    fn partial_document_overrides_only_given_keys() {
        let config =
            AppConfig::from_json_str(r#"{"maintenance": true, "claimTimeoutSecs": 3}"#).unwrap();
        assert!(config.maintenance);
        assert_eq!(config.claim_timeout, Duration::from_secs(3));
        assert_eq!(config.db_queue, "arena-db-queue");
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let config = AppConfig::from_json_str(r#"{"outboundBuffer": 0, "maxTaskAttempts": 0}"#)
            .unwrap();
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.max_task_attempts, 1);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(AppConfig::from_json_str(r#"{"queueJoins": "yes"}"#).is_err());
    }

    #[test]
    fn companion_lists_follow_the_queue_name() {
        assert_eq!(AppConfig::processing_list("q"), "q:processing");
        assert_eq!(AppConfig::dead_list("q"), "q:dead");
    }
}

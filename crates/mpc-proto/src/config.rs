use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub telemetry: PollConfig,
    #[serde(default)]
    pub skip: SkipConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where the player's web interface lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_command_path")]
    pub command_path: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Poll from a dedicated background thread. When false, or when the
    /// thread cannot be started, polling runs on the main runtime.
    #[serde(default = "default_background_worker")]
    pub background_worker: bool,
}

/// Thresholds for the intro/outro skip detector. All values in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipConfig {
    #[serde(default = "default_skip_enabled")]
    pub enabled: bool,
    /// Minimum gap between two issued skips.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// How long a seek stays in flight before another skip is considered.
    #[serde(default = "default_seek_hold_ms")]
    pub seek_hold_ms: u64,
    /// Same for "next track"; the player needs longer to switch files.
    #[serde(default = "default_next_track_hold_ms")]
    pub next_track_hold_ms: u64,
    /// A position jump larger than this is treated as a manual seek.
    #[serde(default = "default_seek_jump_threshold_ms")]
    pub seek_jump_threshold_ms: u64,
    /// Positions below this count as "file just started".
    #[serde(default = "default_new_file_start_ms")]
    pub new_file_start_ms: u64,
    /// A point head only fires while playback is inside this window.
    #[serde(default = "default_head_point_window_ms")]
    pub head_point_window_ms: u64,
    /// Player command id for "next file".
    #[serde(default = "default_next_track_command")]
    pub next_track_command: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
}

/// Payload of the `init` and `update_config` control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub status_url: String,
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval clamped to at least 50ms so a zero in the config cannot spin.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(50))
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            status_path: default_status_path(),
            command_path: default_command_path(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            background_worker: default_background_worker(),
        }
    }
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            enabled: default_skip_enabled(),
            cooldown_ms: default_cooldown_ms(),
            seek_hold_ms: default_seek_hold_ms(),
            next_track_hold_ms: default_next_track_hold_ms(),
            seek_jump_threshold_ms: default_seek_jump_threshold_ms(),
            new_file_start_ms: default_new_file_start_ms(),
            head_point_window_ms: default_head_point_window_ms(),
            next_track_command: default_next_track_command(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:13579".to_string()
}

fn default_status_path() -> String {
    "/status.html".to_string()
}

fn default_command_path() -> String {
    "/command.html".to_string()
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_background_worker() -> bool {
    true
}

fn default_skip_enabled() -> bool {
    true
}

fn default_cooldown_ms() -> u64 {
    100
}

fn default_seek_hold_ms() -> u64 {
    500
}

fn default_next_track_hold_ms() -> u64 {
    1000
}

fn default_seek_jump_threshold_ms() -> u64 {
    10_000
}

fn default_new_file_start_ms() -> u64 {
    500
}

fn default_head_point_window_ms() -> u64 {
    5000
}

fn default_next_track_command() -> u32 {
    920
}

fn default_rules_file() -> PathBuf {
    platform::data_dir().join("skip-rules.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn status_url(&self) -> String {
        join_url(&self.player.base_url, &self.player.status_path)
    }

    pub fn command_url(&self) -> String {
        join_url(&self.player.base_url, &self.player.command_path)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            status_url: self.status_url(),
            timeout_ms: self.telemetry.timeout_ms,
            interval_ms: self.telemetry.interval_ms,
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.status_url(), "http://127.0.0.1:13579/status.html");
        assert_eq!(config.command_url(), "http://127.0.0.1:13579/command.html");
        assert_eq!(config.telemetry.interval_ms, 1000);
        assert_eq!(config.skip.next_track_command, 920);
        assert!(config.telemetry.background_worker);
        assert!(config.paths.rules_file.ends_with("skip-rules.json"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [player]
            base_url = "http://192.168.1.20:13579/"

            [skip]
            cooldown_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.status_url(), "http://192.168.1.20:13579/status.html");
        assert_eq!(config.skip.cooldown_ms, 250);
        assert_eq!(config.skip.seek_hold_ms, 500);
        assert_eq!(config.telemetry.timeout_ms, 5000);
    }

    #[test]
    fn test_interval_is_clamped() {
        let cfg = TelemetryConfig {
            status_url: String::new(),
            timeout_ms: 10,
            interval_ms: 0,
        };
        assert_eq!(cfg.interval(), Duration::from_millis(50));
    }
}

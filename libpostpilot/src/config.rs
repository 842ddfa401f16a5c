//! Configuration management for Postpilot

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    /// Per-platform quota and rate budgets, keyed by platform name.
    /// Platforms absent from the map fall back to built-in defaults.
    #[serde(default)]
    pub platforms: HashMap<Platform, PlatformConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Worker and admission-control tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// First hour of the posting window (inclusive), 0-23.
    pub window_start_hour: u32,
    /// End hour of the posting window (exclusive), 0-23.
    pub window_end_hour: u32,
    /// Reference timezone, expressed as whole hours offset from UTC.
    pub utc_offset_hours: i32,
    /// Jobs due within this many seconds of a tick are picked up.
    pub lookahead_secs: i64,
    /// Job-level attempt ceiling.
    pub max_attempts: u32,
    /// When true, transports synthesize success without network calls.
    pub dry_run: bool,
    /// Per-attempt transport timeout; exceeding it counts as transient.
    pub transport_timeout_secs: u64,
    /// Minimum spacing between requests to the same platform.
    pub min_request_interval_ms: u64,
    /// Jobs left `running` longer than this are presumed orphaned by a
    /// crash and returned to `pending` on the next tick.
    pub running_stale_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_start_hour: 8,
            window_end_hour: 22,
            utc_offset_hours: 0,
            lookahead_secs: 60,
            max_attempts: 5,
            dry_run: false,
            transport_timeout_secs: 10,
            min_request_interval_ms: 1000,
            running_stale_secs: 900,
        }
    }
}

/// Content-safety configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub banned_words: Vec<String>,
    pub banned_tags: Vec<String>,
    pub risk_level: RiskLevel,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            banned_words: vec![
                "bedava".to_string(),
                "guaranteed income".to_string(),
                "get rich quick".to_string(),
            ],
            banned_tags: vec!["#crypto".to_string(), "#bet".to_string()],
            risk_level: RiskLevel::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Normal,
    Aggressive,
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RiskLevel::Conservative),
            "normal" => Ok(RiskLevel::Normal),
            "aggressive" => Ok(RiskLevel::Aggressive),
            _ => Err(format!(
                "Invalid risk level: '{}'. Valid options: conservative, normal, aggressive",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Effective publishes allowed per local day.
    pub daily_limit: u32,
    /// Requests allowed per rolling hour.
    pub hourly_limit: u32,
}

/// Built-in budgets for platforms not configured explicitly.
fn builtin_platform_config(platform: Platform) -> PlatformConfig {
    match platform {
        Platform::X => PlatformConfig {
            daily_limit: 20,
            hourly_limit: 30,
        },
        Platform::Instagram => PlatformConfig {
            daily_limit: 10,
            hourly_limit: 15,
        },
        Platform::LinkedIn => PlatformConfig {
            daily_limit: 10,
            hourly_limit: 10,
        },
        Platform::TikTok => PlatformConfig {
            daily_limit: 5,
            hourly_limit: 10,
        },
        Platform::Facebook => PlatformConfig {
            daily_limit: 15,
            hourly_limit: 20,
        },
        Platform::Telegram => PlatformConfig {
            daily_limit: 30,
            hourly_limit: 60,
        },
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration.
    ///
    /// Dry-run is enabled here: a freshly initialized install has no live
    /// transport wired in, and the full pipeline should still be exercisable.
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/postpilot/postpilot.db".to_string(),
            },
            scheduler: SchedulerConfig {
                dry_run: true,
                ..SchedulerConfig::default()
            },
            guardrails: GuardrailConfig::default(),
            platforms: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sched = &self.scheduler;
        if sched.window_start_hour > 23 || sched.window_end_hour > 23 {
            return Err(ConfigError::InvalidValue(
                "posting window hours must be in 0-23".to_string(),
            )
            .into());
        }
        if sched.window_start_hour >= sched.window_end_hour {
            return Err(ConfigError::InvalidValue(format!(
                "posting window start ({}) must be before end ({})",
                sched.window_start_hour, sched.window_end_hour
            ))
            .into());
        }
        if !(-12..=14).contains(&sched.utc_offset_hours) {
            return Err(ConfigError::InvalidValue(format!(
                "utc_offset_hours ({}) must be in -12..=14",
                sched.utc_offset_hours
            ))
            .into());
        }
        if sched.max_attempts == 0 {
            return Err(
                ConfigError::InvalidValue("max_attempts must be at least 1".to_string()).into(),
            );
        }
        Ok(())
    }

    /// Resolved budget for a platform, falling back to built-in defaults.
    pub fn platform_config(&self, platform: Platform) -> PlatformConfig {
        self.platforms
            .get(&platform)
            .copied()
            .unwrap_or_else(|| builtin_platform_config(platform))
    }

    pub fn daily_limits(&self) -> HashMap<Platform, u32> {
        Platform::ALL
            .iter()
            .map(|&p| (p, self.platform_config(p).daily_limit))
            .collect()
    }

    pub fn hourly_limits(&self) -> HashMap<Platform, u32> {
        Platform::ALL
            .iter()
            .map(|&p| (p, self.platform_config(p).hourly_limit))
            .collect()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTPILOT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postpilot").join("config.toml"))
}

/// Resolve the database path, honoring the `POSTPILOT_DB_PATH` override.
pub fn resolve_db_path(config: &Config) -> String {
    std::env::var("POSTPILOT_DB_PATH").unwrap_or_else(|_| config.database.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert!(config.scheduler.dry_run);
        assert_eq!(config.scheduler.window_start_hour, 8);
        assert_eq!(config.scheduler.window_end_hour, 22);
        assert_eq!(config.scheduler.max_attempts, 5);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [database]
            path = "/tmp/pp.db"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/pp.db");
        assert_eq!(config.scheduler.lookahead_secs, 60);
        assert!(!config.scheduler.dry_run);
        assert_eq!(config.guardrails.risk_level, RiskLevel::Normal);
    }

    #[test]
    fn test_parse_platform_overrides() {
        let toml_str = r#"
            [database]
            path = "/tmp/pp.db"

            [platforms.telegram]
            daily_limit = 10
            hourly_limit = 20

            [platforms.x]
            daily_limit = 3
            hourly_limit = 5
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.platform_config(Platform::Telegram).daily_limit, 10);
        assert_eq!(config.platform_config(Platform::X).hourly_limit, 5);
        // Unconfigured platforms keep built-in budgets.
        assert_eq!(config.platform_config(Platform::LinkedIn).daily_limit, 10);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = Config::default_config();
        config.scheduler.window_start_hour = 22;
        config.scheduler.window_end_hour = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_hour() {
        let mut config = Config::default_config();
        config.scheduler.window_end_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default_config();
        config.scheduler.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_risk_level_parsing() {
        assert_eq!(
            "conservative".parse::<RiskLevel>().unwrap(),
            RiskLevel::Conservative
        );
        assert!("paranoid".parse::<RiskLevel>().is_err());
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env_override() {
        std::env::set_var("POSTPILOT_CONFIG", "/tmp/custom.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
        std::env::remove_var("POSTPILOT_CONFIG");
    }

    #[test]
    #[serial]
    fn test_resolve_db_path_env_override() {
        let config = Config::default_config();
        std::env::set_var("POSTPILOT_DB_PATH", "/tmp/override.db");
        assert_eq!(resolve_db_path(&config), "/tmp/override.db");
        std::env::remove_var("POSTPILOT_DB_PATH");
        assert_eq!(resolve_db_path(&config), config.database.path);
    }
}

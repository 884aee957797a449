//! Main application configuration
//!
//! This module defines the primary configuration structures for the map-veto
//! service, including environment variable loading and validation.

use crate::types::SessionMode;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
    pub tournament: TournamentSettings,
    pub autostart: AutostartSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Periodic tick interval in seconds; the sole driver of time-based behavior
    pub tick_interval_seconds: u64,
    /// Default selection mode the server runs in
    pub default_mode: SessionMode,
}

/// Matchmaking vote settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingSettings {
    /// Vote window length in seconds
    pub vote_duration_seconds: u64,
    /// Poll cycles the lifecycle engine waits below map-loaded before forcing match start
    pub lifecycle_grace_cycles: u32,
}

/// Tournament draft settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSettings {
    /// Seconds a captain has to act before the timeout fallback fires
    pub action_timeout_seconds: u64,
    /// Series length used when a start request does not specify one
    pub default_best_of: usize,
}

/// Autostart / ready-gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutostartSettings {
    /// Connected human players required before autostart may trigger
    pub min_players_threshold: usize,
    /// Announced delay between eligibility and the actual start
    pub prestart_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            matchmaking: MatchmakingSettings::default(),
            tournament: TournamentSettings::default(),
            autostart: AutostartSettings::default(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "map-veto".to_string(),
            log_level: "info".to_string(),
            tick_interval_seconds: 1,
            default_mode: SessionMode::Matchmaking,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            vote_duration_seconds: 60,
            lifecycle_grace_cycles: 3,
        }
    }
}

impl Default for TournamentSettings {
    fn default() -> Self {
        Self {
            action_timeout_seconds: 30,
            default_best_of: 1,
        }
    }
}

impl Default for AutostartSettings {
    fn default() -> Self {
        Self {
            min_players_threshold: 2,
            prestart_seconds: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(interval) = env::var("TICK_INTERVAL_SECONDS") {
            config.service.tick_interval_seconds = interval
                .parse()
                .map_err(|_| anyhow!("Invalid TICK_INTERVAL_SECONDS value: {}", interval))?;
        }
        if let Ok(mode) = env::var("DEFAULT_MODE") {
            config.service.default_mode = match mode.to_lowercase().as_str() {
                "matchmaking" => SessionMode::Matchmaking,
                "tournament" => SessionMode::Tournament,
                other => return Err(anyhow!("Invalid DEFAULT_MODE value: {}", other)),
            };
        }

        // Matchmaking settings
        if let Ok(duration) = env::var("VOTE_DURATION_SECONDS") {
            config.matchmaking.vote_duration_seconds = duration
                .parse()
                .map_err(|_| anyhow!("Invalid VOTE_DURATION_SECONDS value: {}", duration))?;
        }
        if let Ok(cycles) = env::var("LIFECYCLE_GRACE_CYCLES") {
            config.matchmaking.lifecycle_grace_cycles = cycles
                .parse()
                .map_err(|_| anyhow!("Invalid LIFECYCLE_GRACE_CYCLES value: {}", cycles))?;
        }

        // Tournament settings
        if let Ok(timeout) = env::var("ACTION_TIMEOUT_SECONDS") {
            config.tournament.action_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid ACTION_TIMEOUT_SECONDS value: {}", timeout))?;
        }
        if let Ok(best_of) = env::var("DEFAULT_BEST_OF") {
            config.tournament.default_best_of = best_of
                .parse()
                .map_err(|_| anyhow!("Invalid DEFAULT_BEST_OF value: {}", best_of))?;
        }

        // Autostart settings
        if let Ok(threshold) = env::var("MIN_PLAYERS_THRESHOLD") {
            config.autostart.min_players_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("Invalid MIN_PLAYERS_THRESHOLD value: {}", threshold))?;
        }
        if let Ok(prestart) = env::var("PRESTART_SECONDS") {
            config.autostart.prestart_seconds = prestart
                .parse()
                .map_err(|_| anyhow!("Invalid PRESTART_SECONDS value: {}", prestart))?;
        }

        validate_config(&config)?;
        Ok(config)
    }
}

/// Validate a configuration, rejecting values the core cannot operate with
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.service.tick_interval_seconds == 0 {
        return Err(anyhow!("tick_interval_seconds must be at least 1"));
    }
    if config.matchmaking.vote_duration_seconds == 0 {
        return Err(anyhow!("vote_duration_seconds must be at least 1"));
    }
    if config.tournament.action_timeout_seconds == 0 {
        return Err(anyhow!("action_timeout_seconds must be at least 1"));
    }
    if config.tournament.default_best_of == 0 {
        return Err(anyhow!("default_best_of must be at least 1"));
    }
    if config.autostart.min_players_threshold == 0 {
        return Err(anyhow!("min_players_threshold must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.service.default_mode, SessionMode::Matchmaking);
        assert_eq!(config.autostart.prestart_seconds, 10);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.matchmaking.vote_duration_seconds = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.autostart.min_players_threshold = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("VOTE_DURATION_SECONDS", "90");
        env::set_var("MIN_PLAYERS_THRESHOLD", "4");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.matchmaking.vote_duration_seconds, 90);
        assert_eq!(config.autostart.min_players_threshold, 4);
        env::remove_var("VOTE_DURATION_SECONDS");
        env::remove_var("MIN_PLAYERS_THRESHOLD");
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("PRESTART_SECONDS", "soon");
        assert!(AppConfig::from_env().is_err());
        env::remove_var("PRESTART_SECONDS");
    }
}

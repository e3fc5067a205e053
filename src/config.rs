// Process configuration, read once at startup.
//
// Precedence (lowest to highest):
// 1. Programmatic defaults
// 2. Legacy variable names (CALENDARIFIC_API_KEY, CALENDARIFIC_URL, CACHE_TTL, PORT)
// 3. HOLIDAY_PROXY_* variables

use std::net::SocketAddr;

use anyhow::{Context, Result};
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::telemetry::LogFormat;
use crate::upstream::{ClientConfig, DEFAULT_BASE_URL};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key is missing. Set CALENDARIFIC_API_KEY or HOLIDAY_PROXY_API_KEY")]
    MissingApiKey,

    #[error("Base URL cannot be empty")]
    EmptyBaseUrl,

    #[error("Invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "string_or_number")]
    pub api_key: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub upstream_timeout_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            cache_ttl_secs: 3600,
            cache_sweep_interval_secs: 60,
            upstream_timeout_ms: 10_000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

// Environment values that look like numbers reach serde as numbers,
// so an all-digit key has to be turned back into its text.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

impl Config {
    // Defaults merged with the process environment
    pub fn figment() -> Figment {
        let legacy = Env::raw().filter_map(|key| match key.as_str() {
            k if k.eq_ignore_ascii_case("CALENDARIFIC_API_KEY") => Some("api_key".into()),
            k if k.eq_ignore_ascii_case("CALENDARIFIC_URL") => Some("base_url".into()),
            k if k.eq_ignore_ascii_case("CACHE_TTL") => Some("cache_ttl_secs".into()),
            k if k.eq_ignore_ascii_case("PORT") => Some("port".into()),
            _ => None,
        });

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(legacy)
            .merge(Env::prefixed("HOLIDAY_PROXY_"))
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .context("Failed to extract configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        if self.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }

        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("cache_ttl_secs"));
        }

        if self.cache_sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("cache_sweep_interval_secs"));
        }

        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("upstream_timeout_ms"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from_secs(self.cache_ttl_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout_ms: self.upstream_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn with_key() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Serialized::default("api_key", "test-key"))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(with_key()).unwrap();

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, "https://calendarific.com/api/v2");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.cache_config().ttl, Duration::from_secs(3600));
        assert_eq!(config.listen_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_overrides_are_merged() {
        let figment = with_key()
            .merge(Serialized::default("cache_ttl_secs", 60))
            .merge(Serialized::default("port", 8080))
            .merge(Serialized::default("log_format", "json"));
        let config = Config::from_figment(figment).unwrap();

        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);

        let client = config.client_config();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.timeout_ms, 10_000);
    }

    #[test]
    fn test_validation() {
        let base = Config {
            api_key: "key".to_string(),
            ..Config::default()
        };
        assert!(base.validate().is_ok());

        assert_eq!(
            Config::default().validate(),
            Err(ConfigError::MissingApiKey)
        );
        assert_eq!(
            Config {
                cache_ttl_secs: 0,
                ..base.clone()
            }
            .validate(),
            Err(ConfigError::ZeroDuration("cache_ttl_secs"))
        );
        assert_eq!(
            Config {
                base_url: " ".to_string(),
                ..base.clone()
            }
            .validate(),
            Err(ConfigError::EmptyBaseUrl)
        );
        assert_eq!(
            Config {
                log_level: "loud".to_string(),
                ..base
            }
            .validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_numeric_api_key_is_kept_as_text() {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Serialized::default("api_key", 1234567890u64));
        let config = Config::from_figment(figment).unwrap();

        assert_eq!(config.api_key, "1234567890");
        assert_eq!(config.client_config().api_key, "1234567890");
    }

    #[test]
    fn test_numeric_api_key_from_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CALENDARIFIC_API_KEY", "1234567890");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.api_key, "1234567890");
            Ok(())
        });
    }

    #[test]
    fn test_missing_api_key_fails_to_load() {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        assert!(Config::from_figment(figment).is_err());
    }
}

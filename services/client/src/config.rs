use crate::api::DEFAULT_REQUEST_TIMEOUT;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base location of the HTTP endpoints.
    pub api_url: String,
    /// Base location of the realtime socket.
    pub ws_url: String,
    pub reconnect_delay: Duration,
    /// Limit on any single HTTP request to the backend.
    pub request_timeout: Duration,
    /// `None` when keepalive pings are off.
    pub keepalive: Option<Duration>,
    pub speech_lang: String,
    /// External program that reads text aloud, e.g. `espeak-ng` or `say`.
    pub tts_command: Option<String>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let ws_url = std::env::var("WS_URL").unwrap_or_else(|_| "ws://localhost:8000".to_string());

        let reconnect_delay = Duration::from_millis(parse_number("RECONNECT_DELAY_MS", 3000)?);

        let request_timeout = match parse_number("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT.as_secs())? {
            0 => {
                return Err(ConfigError::InvalidValue(
                    "REQUEST_TIMEOUT_SECS".to_string(),
                    "timeout must be at least one second".to_string(),
                ));
            }
            secs => Duration::from_secs(secs),
        };

        let keepalive = match parse_number("KEEPALIVE_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let speech_lang = std::env::var("SPEECH_LANG").unwrap_or_else(|_| "en-US".to_string());
        if speech_lang.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "SPEECH_LANG".to_string(),
                "language tag must not be empty".to_string(),
            ));
        }

        let tts_command = std::env::var("TTS_COMMAND")
            .ok()
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let mut config = Self {
            api_url,
            ws_url,
            reconnect_delay,
            request_timeout,
            keepalive,
            speech_lang,
            tts_command,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the endpoint schemes and strips trailing slashes.
    ///
    /// Run again after any field is overridden outside the environment.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        check_scheme("API_URL", &self.api_url, &["http://", "https://"])?;
        check_scheme("WS_URL", &self.ws_url, &["ws://", "wss://"])?;
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        self.ws_url = self.ws_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

fn check_scheme(var: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if schemes.iter().any(|scheme| value.starts_with(scheme)) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' must start with one of {}", value, schemes.join(", ")),
        ))
    }
}

fn parse_number(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(var.to_string(), format!("'{}' is not a whole number", raw))
        }),
        Err(_) => Ok(default),
    }
}

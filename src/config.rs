//! Environment-driven configuration.
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `VRCWATCH_LOG_DIR` | no | VRChat log directory; defaults to the standard install path under the home directory |
//! | `VRCWATCH_COOLDOWN_SECS` | no | per-key notification cooldown in seconds (default 10, 0 disables) |
//! | `VRCWATCH_PUSH_URL` | no | push notification endpoint; enables the push channel |
//! | `VRCWATCH_PUSH_TOKEN` | no | bearer token for the push endpoint |
//!
//! The push variables come as a pair: setting one without the other is a
//! configuration error rather than a silently disabled channel.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;

/// Default per-key cooldown between identical notifications.
const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// Where VRChat writes its logs, relative to the home directory.
const DEFAULT_LOG_SUBDIR: &str = "AppData/LocalLow/VRChat/VRChat";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("could not determine the home directory")]
    NoHomeDirectory,
}

/// Push endpoint settings, present only when fully configured.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_dir: PathBuf,
    pub notify_cooldown: Duration,
    pub push: Option<PushConfig>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_dir = match env::var("VRCWATCH_LOG_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let base = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base.home_dir().join(DEFAULT_LOG_SUBDIR)
            }
        };

        let notify_cooldown = match env::var("VRCWATCH_COOLDOWN_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "VRCWATCH_COOLDOWN_SECS".to_string(),
                    message: format!("'{raw}' is not a non-negative integer"),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        };

        let push_url = env::var("VRCWATCH_PUSH_URL").ok().filter(|v| !v.is_empty());
        let push_token = env::var("VRCWATCH_PUSH_TOKEN")
            .ok()
            .filter(|v| !v.is_empty());
        let push = match (push_url, push_token) {
            (Some(url), Some(token)) => Some(PushConfig { url, token }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "VRCWATCH_PUSH_TOKEN".to_string(),
                    message: "required when VRCWATCH_PUSH_URL is set".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "VRCWATCH_PUSH_URL".to_string(),
                    message: "required when VRCWATCH_PUSH_TOKEN is set".to_string(),
                });
            }
        };

        Ok(Self {
            log_dir,
            notify_cooldown,
            push,
        })
    }

    #[must_use]
    pub fn has_push(&self) -> bool {
        self.push.is_some()
    }
}

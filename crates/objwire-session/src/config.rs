use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

pub const ENV_AUTO_COMMIT: &str = "OBJWIRE_AUTO_COMMIT";
pub const ENV_AUTO_COMMIT_INTERVAL_MS: &str = "OBJWIRE_AUTO_COMMIT_INTERVAL_MS";
pub const ENV_LOCAL_ONLY: &str = "OBJWIRE_LOCAL_ONLY";
pub const ENV_CALL_TIMEOUT_MS: &str = "OBJWIRE_CALL_TIMEOUT_MS";
pub const ENV_DEFAULT_PARTITION: &str = "OBJWIRE_DEFAULT_PARTITION";

/// Settings consumed by the session layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether a background task commits every session periodically.
    pub auto_commit: bool,
    #[serde(rename = "auto_commit_interval_ms", with = "millis")]
    pub auto_commit_interval: Duration,
    /// When no identity is given to `create_object`, generate one locally
    /// instead of failing.
    pub local_only_missing_identity: bool,
    /// Deadline for a method call that declares none of its own.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub default_call_timeout: Duration,
    pub default_partition: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_commit_interval: Duration::from_secs(1),
            local_only_missing_identity: true,
            default_call_timeout: Duration::from_secs(30),
            default_partition: 0,
        }
    }
}

impl SessionConfig {
    /// Parse TOML; keys that are absent keep their defaults.
    pub fn from_toml_str(text: &str) -> SessionResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> SessionResult<String> {
        toml::to_string(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Defaults overridden by `OBJWIRE_*` environment variables.
    pub fn from_env() -> SessionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `OBJWIRE_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SessionResult<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_AUTO_COMMIT) {
            config.auto_commit = parse_bool(ENV_AUTO_COMMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_AUTO_COMMIT_INTERVAL_MS) {
            config.auto_commit_interval = Duration::from_millis(parse_num(ENV_AUTO_COMMIT_INTERVAL_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_LOCAL_ONLY) {
            config.local_only_missing_identity = parse_bool(ENV_LOCAL_ONLY, &v)?;
        }
        if let Some(v) = lookup(ENV_CALL_TIMEOUT_MS) {
            config.default_call_timeout = Duration::from_millis(parse_num(ENV_CALL_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_DEFAULT_PARTITION) {
            config.default_partition = parse_num(ENV_DEFAULT_PARTITION, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.auto_commit_interval.is_zero() {
            return Err(SessionError::Config("auto_commit_interval_ms must be non-zero".into()));
        }
        if self.default_call_timeout.is_zero() {
            return Err(SessionError::Config("call_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> SessionResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SessionError::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> SessionResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SessionError::Config(format!("{key}: expected a number, got {value:?}")))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

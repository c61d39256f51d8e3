//! Engine Configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use teamgate_billing::{BillingConfig, RateLimitConfig};
use thiserror::Error;

/// One day
const MAX_IMPERSONATION_MINUTES: i64 = 24 * 60;
const MAX_DAYS: i64 = 365;
const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine settings; every section falls back to its defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub impersonation: ImpersonationConfig,
    pub invites: InviteConfig,
    pub teams: TeamConfig,
    pub rate_limits: RateLimitConfig,
    pub billing: BillingConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpersonationConfig {
    /// Session length from start
    pub duration_minutes: i64,
}

impl Default for ImpersonationConfig {
    fn default() -> Self {
        Self { duration_minutes: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    pub ttl_days: i64,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self { ttl_days: 7 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Delay between soft and hard deletion
    pub deletion_grace_days: i64,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self { deletion_grace_days: 7 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        within(
            "impersonation.duration_minutes",
            self.impersonation.duration_minutes,
            1,
            MAX_IMPERSONATION_MINUTES,
        )?;
        within("invites.ttl_days", self.invites.ttl_days, 1, MAX_DAYS)?;
        within("teams.deletion_grace_days", self.teams.deletion_grace_days, 0, MAX_DAYS)?;
        within("sweeper.interval_secs", self.sweeper.interval_secs, 1, MAX_SWEEP_INTERVAL_SECS)?;
        for (field, rule) in [
            ("rate_limits.send_invite", self.rate_limits.send_invite),
            ("rate_limits.ai_request", self.rate_limits.ai_request),
            ("rate_limits.failed_login", self.rate_limits.failed_login),
        ] {
            if rule.capacity == 0 || rule.period_secs == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "capacity and period_secs must be positive".into(),
                });
            }
        }
        Ok(())
    }

    pub fn impersonation_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.impersonation.duration_minutes)
    }

    pub fn invite_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.invites.ttl_days)
    }

    pub fn deletion_grace(&self) -> chrono::Duration {
        chrono::Duration::days(self.teams.deletion_grace_days)
    }
}

fn within<T>(field: &'static str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be between {min} and {max}, got {value}"),
        });
    }
    Ok(())
}

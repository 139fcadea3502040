//! Engine configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development and tests.

use casebook_rbac::PermissionLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use crate::retry::RetryConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Engine-wide settings shared by every repository in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Page size used when a caller gives no limit.
    pub default_page_limit: usize,

    /// Largest page size honoured; bigger limits are clamped.
    pub max_page_limit: usize,

    /// Name of the role that bypasses object permissions.
    pub admin_role_name: String,

    /// Owner recorded when neither the payload nor an audit actor names one.
    pub fallback_owner: String,

    /// Role names granted on plain creates, per level.
    #[serde(default)]
    pub default_grants: BTreeMap<PermissionLevel, Vec<String>>,

    /// Retry policy for blob relocation.
    pub relocation_retry: RetryConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_page_limit: 50,
            max_page_limit: 1000,
            admin_role_name: casebook_rbac::DEFAULT_ADMIN_ROLE.to_string(),
            fallback_owner: "unknown".to_string(),
            default_grants: BTreeMap::new(),
            relocation_retry: RetryConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CASEBOOK_DEFAULT_LIMIT`: default page size (default: 50)
    /// - `CASEBOOK_MAX_LIMIT`: maximum page size (default: 1000)
    /// - `CASEBOOK_ADMIN_ROLE`: admin role name (default: admin)
    /// - `CASEBOOK_FALLBACK_OWNER`: owner for records created without one (default: unknown)
    /// - `CASEBOOK_DEFAULT_READ_ROLES`: comma separated roles granted read on create
    /// - `CASEBOOK_DEFAULT_MODIFY_ROLES`: comma separated roles granted modify on create
    /// - `CASEBOOK_RELOCATE_ATTEMPTS`: blob relocation attempts (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let mut default_grants = BTreeMap::new();
        for (key, level) in [
            ("CASEBOOK_DEFAULT_READ_ROLES", PermissionLevel::Read),
            ("CASEBOOK_DEFAULT_MODIFY_ROLES", PermissionLevel::Modify),
        ] {
            let roles = lookup(key).map(|s| split_list(&s)).unwrap_or_default();
            if !roles.is_empty() {
                default_grants.insert(level, roles);
            }
        }

        let config = Self {
            default_page_limit: parse_or(&lookup, "CASEBOOK_DEFAULT_LIMIT", default.default_page_limit)?,
            max_page_limit: parse_or(&lookup, "CASEBOOK_MAX_LIMIT", default.max_page_limit)?,
            admin_role_name: lookup("CASEBOOK_ADMIN_ROLE").unwrap_or(default.admin_role_name),
            fallback_owner: lookup("CASEBOOK_FALLBACK_OWNER").unwrap_or(default.fallback_owner),
            default_grants,
            relocation_retry: RetryConfig {
                max_attempts: parse_or(
                    &lookup,
                    "CASEBOOK_RELOCATE_ATTEMPTS",
                    default.relocation_retry.max_attempts,
                )?,
                ..default.relocation_retry
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_limit == 0 {
            return Err(ConfigError::invalid("default_page_limit", "must be positive"));
        }
        if self.max_page_limit == 0 {
            return Err(ConfigError::invalid("max_page_limit", "must be positive"));
        }
        if self.default_page_limit > self.max_page_limit {
            return Err(ConfigError::invalid(
                "default_page_limit",
                format!(
                    "{} exceeds max_page_limit {}",
                    self.default_page_limit, self.max_page_limit
                ),
            ));
        }
        if self.admin_role_name.trim().is_empty() {
            return Err(ConfigError::invalid("admin_role_name", "must not be empty"));
        }
        if self.relocation_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("relocation_retry", "max_attempts must be positive"));
        }
        Ok(())
    }

    /// Resolve a caller-supplied limit to the one actually used.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_page_limit)
            .min(self.max_page_limit)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

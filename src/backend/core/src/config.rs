//! Configuration management.
//!
//! Values come from an optional file plus `ORGAUTH__`-prefixed environment
//! variables (`ORGAUTH__SECURITY_ENGINE__CACHE_TTL=10m`). Everything is read
//! once at startup; nothing on the authorization hot path touches the
//! process environment.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{AuthzError, Result};
use crate::telemetry::logging::LoggingConfig;

const ENV_PREFIX: &str = "ORGAUTH";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Org access guard configuration
    #[serde(default)]
    pub guard: GuardConfig,

    /// Security policy engine configuration
    #[serde(default)]
    pub security_engine: SecurityEngineConfig,

    /// Tenant ABAC policy configuration
    #[serde(default)]
    pub abac: AbacConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Reject org and user ids that are not well-formed UUIDs
    #[serde(default = "default_require_uuid_identifiers")]
    pub require_uuid_identifiers: bool,

    /// Audit source recorded when the caller does not supply one
    #[serde(default = "default_audit_source")]
    pub default_audit_source: String,

    /// Development-only governance bypass; see [`Config::validate`]
    #[serde(default)]
    pub development_super_admin: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            require_uuid_identifiers: default_require_uuid_identifiers(),
            default_audit_source: default_audit_source(),
            development_super_admin: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityEngineConfig {
    /// Cache evaluation results
    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,

    /// Cache entry lifetime
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Upper bound on cached evaluation results
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Send every fresh evaluation to the security event sink
    #[serde(default = "default_log_policy_evaluations")]
    pub log_policy_evaluations: bool,
}

impl Default for SecurityEngineConfig {
    fn default() -> Self {
        Self {
            enable_caching: default_enable_caching(),
            cache_ttl: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            log_policy_evaluations: default_log_policy_evaluations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbacConfig {
    /// Reject policy writes that use selectors no role or platform feature knows
    #[serde(default = "default_validate_selectors_on_write")]
    pub validate_selectors_on_write: bool,
}

impl Default for AbacConfig {
    fn default() -> Self {
        Self {
            validate_selectors_on_write: default_validate_selectors_on_write(),
        }
    }
}

// Default value functions
fn default_require_uuid_identifiers() -> bool { true }
fn default_audit_source() -> String { "org-guard".to_string() }
fn default_enable_caching() -> bool { true }
fn default_cache_ttl() -> Duration { Duration::from_secs(300) }
fn default_cache_max_entries() -> usize { 10_000 }
fn default_log_policy_evaluations() -> bool { true }
fn default_validate_selectors_on_write() -> bool { true }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations that must never reach a running process.
    pub fn validate(&self) -> Result<()> {
        if self.guard.development_super_admin {
            if !cfg!(debug_assertions) {
                return Err(AuthzError::Configuration(
                    "development_super_admin cannot be enabled in a release build".to_string(),
                ));
            }
            if self.environment == Environment::Production {
                return Err(AuthzError::Configuration(
                    "development_super_admin cannot be enabled in production".to_string(),
                ));
            }
        }
        if self.security_engine.enable_caching && self.security_engine.cache_ttl.is_zero() {
            return Err(AuthzError::Configuration(
                "security_engine.cache_ttl must be greater than zero when caching is enabled".to_string(),
            ));
        }
        if self.security_engine.enable_caching && self.security_engine.cache_max_entries == 0 {
            return Err(AuthzError::Configuration(
                "security_engine.cache_max_entries must be greater than zero when caching is enabled".to_string(),
            ));
        }
        if self.guard.default_audit_source.trim().is_empty() {
            return Err(AuthzError::Configuration(
                "guard.default_audit_source must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the development bypass may be honoured by this build.
    pub fn development_bypass_enabled(&self) -> bool {
        cfg!(debug_assertions)
            && self.guard.development_super_admin
            && self.environment != Environment::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.guard.require_uuid_identifiers);
        assert_eq!(config.guard.default_audit_source, "org-guard");
        assert!(!config.guard.development_super_admin);
        assert!(config.security_engine.enable_caching);
        assert_eq!(config.security_engine.cache_ttl, Duration::from_secs(300));
        assert!(config.abac.validate_selectors_on_write);
        assert!(config.validate().is_ok());
        assert!(!config.development_bypass_enabled());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
environment = "staging"

[guard]
require_uuid_identifiers = false

[security_engine]
cache_ttl = "90s"
cache_max_entries = 500
log_policy_evaluations = false

[logging]
level = "debug"
format = "compact"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert!(!config.guard.require_uuid_identifiers);
        assert_eq!(config.security_engine.cache_ttl, Duration::from_secs(90));
        assert_eq!(config.security_engine.cache_max_entries, 500);
        assert!(!config.security_engine.log_policy_evaluations);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_super_admin_rejected_in_production() {
        let mut config = Config::default();
        config.guard.development_super_admin = true;
        assert!(matches!(config.validate(), Err(AuthzError::Configuration(_))));
        assert!(!config.development_bypass_enabled());
    }

    #[test]
    fn test_super_admin_allowed_in_debug_development() {
        let mut config = Config::default();
        config.environment = Environment::Development;
        config.guard.development_super_admin = true;
        assert_eq!(config.validate().is_ok(), cfg!(debug_assertions));
        assert_eq!(config.development_bypass_enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = Config::default();
        config.security_engine.cache_ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        let mut config = Config::default();
        config.security_engine.cache_max_entries = 0;
        assert!(matches!(config.validate(), Err(AuthzError::Configuration(_))));

        config.security_engine.enable_caching = false;
        assert!(config.validate().is_ok());
    }
}

use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::utils::PasswordPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct IamConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub token: TokenConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub rate_limit: RateLimitConfig,
    pub event_bus: EventBusConfig,
    pub audit: AuditConfig,
    pub maintenance: MaintenanceConfig,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown ENVIRONMENT '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    /// HS256 shared secret, used when no RS256 key pair is configured.
    pub hmac_secret: Option<String>,
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "iam-service".to_string(),
            audience: "iam-clients".to_string(),
            hmac_secret: Some("dev-only-signing-secret-change-me".to_string()),
            private_key_path: None,
            public_key_path: None,
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub session_ttl_hours: i64,
    /// Sessions scoring above this are flagged suspicious.
    pub risk_threshold: u8,
    /// How far back denied attempts from an IP count towards risk.
    pub risk_lookback_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            risk_threshold: 70,
            risk_lookback_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub require_email_verification: bool,
    pub max_failed_attempts: u32,
    pub lockout_window_minutes: i64,
    pub password_policy: PasswordPolicy,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            require_email_verification: false,
            max_failed_attempts: 5,
            lockout_window_minutes: 15,
            password_policy: PasswordPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_attempts: 10,
            window_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    pub history_capacity: usize,
    pub handler_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            handler_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file; audit records stay in memory when unset.
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub interval_seconds: u64,
    pub attempt_retention_hours: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            attempt_retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "iam-service".to_string(),
            log_level: "info".to_string(),
            token: TokenConfig::default(),
            session: SessionConfig::default(),
            identity: IdentityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            event_bus: EventBusConfig::default(),
            audit: AuditConfig::default(),
            maintenance: MaintenanceConfig::default(),
            redis: None,
        }
    }
}

impl IamConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = IamConfig::default();

        let config = IamConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("iam-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            token: TokenConfig {
                issuer: get_env("TOKEN_ISSUER", Some(defaults.token.issuer.as_str()), is_prod)?,
                audience: get_env("TOKEN_AUDIENCE", Some(defaults.token.audience.as_str()), is_prod)?,
                hmac_secret: match optional_env("TOKEN_HMAC_SECRET") {
                    Some(secret) => Some(secret),
                    None if is_prod => None,
                    None => defaults.token.hmac_secret.clone(),
                },
                private_key_path: optional_env("TOKEN_PRIVATE_KEY_PATH"),
                public_key_path: optional_env("TOKEN_PUBLIC_KEY_PATH"),
                access_token_ttl_minutes: parse_env("TOKEN_ACCESS_TTL_MINUTES", "15", is_prod)?,
                refresh_token_ttl_days: parse_env("TOKEN_REFRESH_TTL_DAYS", "7", is_prod)?,
            },
            session: SessionConfig {
                session_ttl_hours: parse_env("SESSION_TTL_HOURS", "24", is_prod)?,
                risk_threshold: parse_env("SESSION_RISK_THRESHOLD", "70", is_prod)?,
                risk_lookback_minutes: parse_env("SESSION_RISK_LOOKBACK_MINUTES", "60", is_prod)?,
            },
            identity: IdentityConfig {
                require_email_verification: parse_env(
                    "IDENTITY_REQUIRE_EMAIL_VERIFICATION",
                    "false",
                    is_prod,
                )?,
                max_failed_attempts: parse_env("IDENTITY_MAX_FAILED_ATTEMPTS", "5", is_prod)?,
                lockout_window_minutes: parse_env(
                    "IDENTITY_LOCKOUT_WINDOW_MINUTES",
                    "15",
                    is_prod,
                )?,
                password_policy: PasswordPolicy {
                    min_length: parse_env("PASSWORD_MIN_LENGTH", "8", is_prod)?,
                    max_length: parse_env("PASSWORD_MAX_LENGTH", "128", is_prod)?,
                    require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", "true", is_prod)?,
                    require_number: parse_env("PASSWORD_REQUIRE_NUMBER", "true", is_prod)?,
                    require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", "true", is_prod)?,
                },
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", is_prod)?,
                window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
            },
            event_bus: EventBusConfig {
                history_capacity: parse_env("EVENT_HISTORY_CAPACITY", "1000", is_prod)?,
                handler_timeout_ms: parse_env("EVENT_HANDLER_TIMEOUT_MS", "5000", is_prod)?,
            },
            audit: AuditConfig {
                log_path: optional_env("AUDIT_LOG_PATH"),
            },
            maintenance: MaintenanceConfig {
                interval_seconds: parse_env("MAINTENANCE_INTERVAL_SECONDS", "60", is_prod)?,
                attempt_retention_hours: parse_env(
                    "MAINTENANCE_ATTEMPT_RETENTION_HOURS",
                    "24",
                    is_prod,
                )?,
            },
            redis: optional_env("REDIS_URL").map(|url| RedisConfig { url }),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.token.access_token_ttl_minutes <= 0 {
            return Err(config_error("TOKEN_ACCESS_TTL_MINUTES must be positive"));
        }

        if self.token.refresh_token_ttl_days <= 0 {
            return Err(config_error("TOKEN_REFRESH_TTL_DAYS must be positive"));
        }

        if self.token.issuer.trim().is_empty() || self.token.audience.trim().is_empty() {
            return Err(config_error("TOKEN_ISSUER and TOKEN_AUDIENCE must not be empty"));
        }

        let has_key_pair =
            self.token.private_key_path.is_some() && self.token.public_key_path.is_some();
        let has_secret = self
            .token
            .hmac_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if !has_key_pair && !has_secret {
            return Err(config_error(
                "Either TOKEN_HMAC_SECRET or both TOKEN_PRIVATE_KEY_PATH and TOKEN_PUBLIC_KEY_PATH must be set",
            ));
        }

        if self.session.session_ttl_hours <= 0 {
            return Err(config_error("SESSION_TTL_HOURS must be positive"));
        }

        if self.session.risk_threshold > 100 {
            return Err(config_error("SESSION_RISK_THRESHOLD must be between 0 and 100"));
        }

        if self.identity.max_failed_attempts == 0 || self.identity.lockout_window_minutes <= 0 {
            return Err(config_error(
                "IDENTITY_MAX_FAILED_ATTEMPTS and IDENTITY_LOCKOUT_WINDOW_MINUTES must be positive",
            ));
        }

        let policy = &self.identity.password_policy;
        if policy.min_length == 0 || policy.min_length > policy.max_length {
            return Err(config_error(
                "PASSWORD_MIN_LENGTH must be positive and not exceed PASSWORD_MAX_LENGTH",
            ));
        }

        if self.rate_limit.login_attempts == 0 || self.rate_limit.window_seconds == 0 {
            return Err(config_error("Rate limit attempts and window must be positive"));
        }

        if self.event_bus.handler_timeout_ms == 0 {
            return Err(config_error("EVENT_HANDLER_TIMEOUT_MS must be positive"));
        }

        if self.maintenance.interval_seconds == 0 || self.maintenance.attempt_retention_hours <= 0 {
            return Err(config_error("Maintenance interval and retention must be positive"));
        }

        if self.environment == Environment::Prod {
            if has_secret && self.token.hmac_secret.as_deref().is_some_and(|s| s.len() < 32) {
                return Err(config_error(
                    "TOKEN_HMAC_SECRET must be at least 32 bytes in production",
                ));
            }
            if self.audit.log_path.is_none() {
                tracing::warn!("AUDIT_LOG_PATH not set - audit records are kept in memory only");
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(IamConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_signing_key_is_rejected() {
        let mut config = IamConfig::default();
        config.token.hmac_secret = None;
        assert!(config.validate().is_err());

        config.token.private_key_path = Some("private.pem".into());
        config.token.public_key_path = Some("public.pem".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = IamConfig::default();
        config.session.risk_threshold = 101;
        assert!(config.validate().is_err());

        let mut config = IamConfig::default();
        config.token.access_token_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("production".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Dev));
        assert!("staging".parse::<Environment>().is_err());
    }
}

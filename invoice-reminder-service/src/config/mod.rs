use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub smtp: SmtpConfig,
    pub sender: SenderConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_name: String,
    /// When false reminders go to the in-process mock gateway.
    pub enabled: bool,
}

/// Default SMTP login reminders are sent with.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    pub reset_sweep_hour: u32,
    pub default_send_hour: u32,
    pub dispatch_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

impl ReminderConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let config = ReminderConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("invoice-reminder-service"), false)?,
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", 587)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Billing"), false)?,
                enabled: parse_env("SMTP_ENABLED", false)?,
            },
            sender: SenderConfig {
                username: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
            },
            scheduler: SchedulerConfig {
                tick_seconds: parse_env("SCHEDULER_TICK_SECONDS", 30)?,
                reset_sweep_hour: parse_env("RESET_SWEEP_HOUR", 0)?,
                default_send_hour: parse_env("DEFAULT_SEND_HOUR", 9)?,
                dispatch_timeout_secs: parse_env("DISPATCH_TIMEOUT_SECS", 30)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.scheduler.reset_sweep_hour > 23 || self.scheduler.default_send_hour > 23 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RESET_SWEEP_HOUR and DEFAULT_SEND_HOUR must be within 0..=23"
            )));
        }
        if self.scheduler.dispatch_timeout_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DISPATCH_TIMEOUT_SECS must be positive"
            )));
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Optional numeric setting; present but unparsable is an error.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, val))
        }),
        Err(_) => Ok(default),
    }
}

use crate::core::{GatewayError, Result};
use crate::gateway::retry::RetryPolicy;
use crate::metrics::DEFAULT_SLOW_THRESHOLD;
use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROCEDURE: &str = "app_pkg.execute_query";
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_secs(300);

pub const ENV_PROCEDURE: &str = "ACTIONGATE_PROCEDURE";
pub const ENV_MAX_RETRY_ATTEMPTS: &str = "ACTIONGATE_MAX_RETRY_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "ACTIONGATE_RETRY_BASE_DELAY_MS";
pub const ENV_SLOW_THRESHOLD_MS: &str = "ACTIONGATE_SLOW_THRESHOLD_MS";
pub const ENV_STATEMENT_TIMEOUT_MS: &str = "ACTIONGATE_STATEMENT_TIMEOUT_MS";
pub const ENV_PUBLISH_PERIOD_SECS: &str = "ACTIONGATE_PUBLISH_PERIOD_SECS";

lazy_static! {
    static ref PROCEDURE_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)*$").unwrap();
}

/// Gateway behaviour settings
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Schema-qualified procedure every call is bound to
    pub procedure: String,

    pub retry: RetryPolicy,

    /// Calls slower than this are logged as slow
    pub slow_threshold: Duration,

    /// Upper bound for one procedure call
    pub statement_timeout: Duration,

    /// Interval between scheduled publish ticks
    pub publish_period: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            procedure: DEFAULT_PROCEDURE.to_string(),
            retry: RetryPolicy::default(),
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            publish_period: DEFAULT_PUBLISH_PERIOD,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn procedure(mut self, procedure: &str) -> Self {
        self.procedure = procedure.to_string();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry = RetryPolicy::new(attempts, self.retry.base_delay());
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry = RetryPolicy::new(self.retry.max_attempts(), delay);
        self
    }

    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn publish_period(mut self, period: Duration) -> Self {
        self.publish_period = period;
        self
    }

    /// Load from `ACTIONGATE_*` environment variables, after reading a
    /// `.env` file if one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(procedure) = lookup(ENV_PROCEDURE) {
            config.procedure = procedure.trim().to_string();
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_RETRY_ATTEMPTS)? {
            config = config.max_retry_attempts(attempts);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS)? {
            config = config.retry_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_SLOW_THRESHOLD_MS)? {
            config.slow_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_STATEMENT_TIMEOUT_MS)? {
            config.statement_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_PUBLISH_PERIOD_SECS)? {
            config.publish_period = Duration::from_secs(secs);
        }

        config.validate().map_err(GatewayError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !PROCEDURE_NAME.is_match(&self.procedure) {
            return Err(format!("Invalid procedure name '{}'", self.procedure));
        }

        self.retry.validate()?;

        if self.statement_timeout.is_zero() {
            return Err("statement_timeout must be > 0".to_string());
        }

        if self.publish_period.is_zero() {
            return Err("publish_period must be > 0".to_string());
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

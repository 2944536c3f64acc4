//! Operator configuration loaded from the environment

use std::time::Duration;

use crate::{Error, Result};

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Runtime settings for the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Requeue delay after a converged reconcile, to catch external drift
    pub resync_interval: Duration,
    /// Requeue delay after a failed reconcile
    pub error_requeue: Duration,
    /// Maximum concurrent reconciles across different Tenants
    pub concurrency: u16,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: 8080,
            resync_interval: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
            concurrency: 4,
            log_format: LogFormat::Json,
        }
    }
}

impl OperatorConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names
    ///
    /// Unset variables keep their defaults; set but malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_port = parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?;
        let resync_secs = parse_or(
            &lookup,
            "TENANT_RESYNC_SECONDS",
            defaults.resync_interval.as_secs(),
        )?;
        let error_secs = parse_or(
            &lookup,
            "TENANT_ERROR_REQUEUE_SECONDS",
            defaults.error_requeue.as_secs(),
        )?;
        let concurrency = parse_or(&lookup, "TENANT_CONCURRENCY", defaults.concurrency)?;

        let log_format = match lookup("RUST_LOG_FORMAT").map(|v| v.to_lowercase()) {
            None => defaults.log_format,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) if v == "text" => LogFormat::Text,
            Some(other) => {
                return Err(Error::ConfigError(format!(
                    "RUST_LOG_FORMAT must be json or text, got {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            metrics_port,
            resync_interval: Duration::from_secs(resync_secs),
            error_requeue: Duration::from_secs(error_secs),
            concurrency,
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::ConfigError(format!("{} has invalid value {:?}: {}", key, raw, e))),
    }
}

//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::scheduler::{
    SchedulerConfig, DEFAULT_CHECK_INTERVAL, DEFAULT_INITIAL_CHECK_DELAY, DEFAULT_STAGGER,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Storage file. A `.json` extension selects the JSON store, anything
    /// else SQLite (default: "sitewatch.db")
    pub db_path: PathBuf,
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    pub stagger: Duration,
    pub initial_check_delay: Duration,
    /// Discord-compatible webhook for downtime alerts. Alerts are only
    /// logged when unset.
    pub webhook_url: Option<String>,
    /// User id to mention in webhook alerts.
    pub webhook_mention: Option<String>,
    /// Whether targets without an explicit preference get notifications.
    pub notify_by_default: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: PathBuf::from("sitewatch.db"),
            check_interval: DEFAULT_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stagger: DEFAULT_STAGGER,
            initial_check_delay: DEFAULT_INITIAL_CHECK_DELAY,
            webhook_url: None,
            webhook_mention: None,
            notify_by_default: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SITEWATCH_DB_PATH`: storage file (default: "sitewatch.db")
    /// - `SITEWATCH_CHECK_INTERVAL_SECS`: seconds between cycles (default: 300)
    /// - `SITEWATCH_PROBE_TIMEOUT_SECS`: probe timeout (default: 15)
    /// - `SITEWATCH_STAGGER_MS`: spacing between dispatches (default: 300)
    /// - `SITEWATCH_INITIAL_CHECK_DELAY_MS`: first-check delay (default: 500)
    /// - `SITEWATCH_WEBHOOK_URL`: downtime webhook (optional)
    /// - `SITEWATCH_WEBHOOK_MENTION`: user id to mention (optional)
    /// - `SITEWATCH_NOTIFY_BY_DEFAULT`: `true`/`false` (default: false)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("SITEWATCH_HTTP_PORT") {
            cfg.http_port = parse("SITEWATCH_HTTP_PORT", &port)?;
        }

        if let Some(db_path) = get("SITEWATCH_DB_PATH") {
            cfg.db_path = PathBuf::from(db_path);
        }

        if let Some(secs) = get("SITEWATCH_CHECK_INTERVAL_SECS") {
            cfg.check_interval = Duration::from_secs(positive("SITEWATCH_CHECK_INTERVAL_SECS", &secs)?);
        }

        if let Some(secs) = get("SITEWATCH_PROBE_TIMEOUT_SECS") {
            cfg.probe_timeout = Duration::from_secs(positive("SITEWATCH_PROBE_TIMEOUT_SECS", &secs)?);
        }

        if let Some(ms) = get("SITEWATCH_STAGGER_MS") {
            cfg.stagger = Duration::from_millis(parse("SITEWATCH_STAGGER_MS", &ms)?);
        }

        if let Some(ms) = get("SITEWATCH_INITIAL_CHECK_DELAY_MS") {
            cfg.initial_check_delay =
                Duration::from_millis(parse("SITEWATCH_INITIAL_CHECK_DELAY_MS", &ms)?);
        }

        cfg.webhook_url = get("SITEWATCH_WEBHOOK_URL");
        cfg.webhook_mention = get("SITEWATCH_WEBHOOK_MENTION");

        if let Some(flag) = get("SITEWATCH_NOTIFY_BY_DEFAULT") {
            cfg.notify_by_default = parse_bool("SITEWATCH_NOTIFY_BY_DEFAULT", &flag)?;
        }

        Ok(cfg)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            check_interval: self.check_interval,
            stagger: self.stagger,
            initial_check_delay: self.initial_check_delay,
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

// Zero would make tokio's interval panic.
fn positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

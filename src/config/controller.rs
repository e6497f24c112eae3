//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::ConfigurationError;
use crate::constants::*;
use crate::controller::scheduler::PollFrequency;
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// Every setting except the CA source secret has a default. Environment variables are
/// populated from the deployment, typically via `envFrom` on a ConfigMap.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Poll interval while a binding is healthy (`AZURE_VAULT_NORMAL_POLL_INTERVALS`, minutes)
    pub normal_poll_interval: Duration,
    /// Poll interval after repeated failures (`AZURE_VAULT_EXCEPTION_POLL_INTERVALS`, minutes)
    pub slow_poll_interval: Duration,
    /// Consecutive failures before slowing down (`AZURE_VAULT_MAX_FAILURE_ATTEMPTS`)
    pub max_failures_before_slowing_down: u32,
    /// Retries per failure episode before a key is dropped
    pub max_num_requeues: u32,
    /// Size of the reconciliation worker pool
    pub num_threads: usize,
    /// Interval at which all live bindings are re-enqueued
    pub resync_interval: Duration,
    /// First retry delay after a failure
    pub backoff_start: Duration,
    /// Upper bound on retry delay
    pub backoff_max: Duration,
    /// Time allowed for in-flight reconciliations after a shutdown signal
    pub shutdown_grace_period: Duration,
    /// Delay before restarting a failed watch stream
    pub watch_restart_delay: Duration,
    /// Name of the CA bundle ConfigMap written to labelled namespaces
    pub ca_config_map_name: String,
    /// Namespace label that selects CA bundle destinations
    pub akv_label_name: String,
    /// Secret holding the CA certificate
    pub akv_secret_name: String,
    /// Namespace of the CA secret
    pub akv_namespace: String,
    /// Resolve credentials from the environment instead of the cloud config file
    pub custom_auth: bool,
    /// Path to the Azure cloud provider config
    pub cloud_config_path: PathBuf,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl ControllerConfig {
    /// Load configuration from process environment variables with defaults
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] when a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] when a required variable is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let num_threads: usize = vars.parse_or("NUM_THREADS", DEFAULT_NUM_THREADS)?;
        if num_threads == 0 {
            return Err(ConfigurationError::InvalidVariable {
                name: "NUM_THREADS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let normal_mins: u64 = vars.parse_or(
            "AZURE_VAULT_NORMAL_POLL_INTERVALS",
            DEFAULT_NORMAL_POLL_INTERVAL_MINS,
        )?;
        let slow_mins: u64 = vars.parse_or(
            "AZURE_VAULT_EXCEPTION_POLL_INTERVALS",
            DEFAULT_SLOW_POLL_INTERVAL_MINS,
        )?;

        Ok(Self {
            normal_poll_interval: Duration::from_secs(normal_mins * 60),
            slow_poll_interval: Duration::from_secs(slow_mins * 60),
            max_failures_before_slowing_down: vars.parse_or(
                "AZURE_VAULT_MAX_FAILURE_ATTEMPTS",
                DEFAULT_MAX_FAILURES_BEFORE_SLOWING_DOWN,
            )?,
            max_num_requeues: vars.parse_or("MAX_NUM_REQUEUES", DEFAULT_MAX_NUM_REQUEUES)?,
            num_threads,
            resync_interval: Duration::from_secs(
                vars.parse_or("RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL_SECS)?,
            ),
            backoff_start: Duration::from_millis(
                vars.parse_or("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS)?,
            ),
            backoff_max: Duration::from_millis(
                vars.parse_or("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS)?,
            ),
            shutdown_grace_period: Duration::from_secs(vars.parse_or(
                "SHUTDOWN_GRACE_PERIOD_SECS",
                DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS,
            )?),
            watch_restart_delay: Duration::from_secs(vars.parse_or(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            )?),
            ca_config_map_name: vars.string_or("CA_CONFIG_MAP_NAME", DEFAULT_CA_CONFIG_MAP_NAME),
            akv_label_name: vars.string_or("AKV_LABEL_NAME", DEFAULT_AKV_LABEL_NAME),
            akv_secret_name: vars.required("AKV_SECRET_NAME")?,
            akv_namespace: vars.required("AKV_NAMESPACE")?,
            custom_auth: vars.bool_or("CUSTOM_AUTH", false),
            cloud_config_path: PathBuf::from(
                vars.string_or("CLOUDCONFIG", DEFAULT_CLOUD_CONFIG_PATH),
            ),
            metrics_port: vars.parse_or("METRICS_PORT", DEFAULT_METRICS_PORT)?,
            log_format: vars.string_or("LOG_FORMAT", "json"),
        })
    }

    /// Poll scheduler settings derived from this configuration
    #[must_use]
    pub fn poll_frequency(&self) -> PollFrequency {
        PollFrequency {
            normal: self.normal_poll_interval,
            slow: self.slow_poll_interval,
            max_failures_before_slowing_down: self.max_failures_before_slowing_down,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a variable or fall back to the default when unset.
    /// A value that is set but unparseable is an error, not a silent default.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigurationError::InvalidVariable {
                    name: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| {
                let v_lower = v.trim().to_lowercase();
                v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
            })
            .unwrap_or(default)
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String, ConfigurationError> {
        self.get(key)
            .ok_or_else(|| ConfigurationError::MissingVariable(key.to_string()))
    }
}

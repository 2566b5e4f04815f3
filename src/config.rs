//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::job::{CustomInput, DEFAULT_EVENT_CAPACITY};

/// Job configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of concurrent bots.
    pub bots: usize,
    /// Requeues allowed per item before RETRY downgrades to FAIL.
    pub max_retries: u32,
    /// Requeue banned items under the same retry budget.
    pub retry_on_ban: bool,
    /// Auto-pause after this many bans since the last start/resume.
    pub ban_pause_threshold: Option<u32>,
    /// Deadline for a single check.
    pub task_timeout: Duration,
    /// Delay between dispatches.
    pub dispatch_delay: Duration,
    /// How long to wait before asking for a proxy again when none is free.
    pub proxy_wait: Duration,
    /// Checkpoint and timer-tick period.
    pub tick_interval: Duration,
    /// Consecutive checkpoint save failures tolerated before aborting.
    pub max_checkpoint_failures: u32,
    /// Time cancelled tasks get to finish after an abort before being dropped.
    pub abort_grace: Duration,
    /// Lease a proxy for every task.
    pub use_proxies: bool,
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Keep a per-task bot log with every result.
    pub bot_log: bool,
    /// Inputs answered before start.
    pub inputs: Vec<CustomInput>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            bots: 1,
            max_retries: 3,
            retry_on_ban: false,
            ban_pause_threshold: None,
            task_timeout: Duration::from_secs(30),
            dispatch_delay: Duration::ZERO,
            proxy_wait: Duration::from_millis(500),
            tick_interval: Duration::from_secs(1),
            max_checkpoint_failures: 5,
            abort_grace: Duration::from_secs(2),
            use_proxies: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            bot_log: true,
            inputs: Vec::new(),
        }
    }
}

impl JobConfig {
    /// Defaults overridden by `PROBE_*` environment variables. Unparseable
    /// values keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bots: usize = env_parse("PROBE_BOTS").unwrap_or(defaults.bots);
        let max_retries: u32 = env_parse("PROBE_MAX_RETRIES").unwrap_or(defaults.max_retries);
        let task_timeout = env_parse::<u64>("PROBE_TASK_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.task_timeout);
        let ban_pause_threshold: Option<u32> = env_parse("PROBE_BAN_PAUSE_THRESHOLD");
        let tick_interval = env_parse::<u64>("PROBE_TICK_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);
        let use_proxies = std::env::var("PROBE_USE_PROXIES")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.use_proxies);

        Self {
            bots,
            max_retries,
            task_timeout,
            ban_pause_threshold,
            tick_interval,
            use_proxies,
            ..defaults
        }
    }

    /// Reject values a job cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bots == 0 {
            return Err(invalid("bots", "must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(invalid("tick_interval", "must be greater than zero"));
        }
        if self.task_timeout.is_zero() {
            return Err(invalid("task_timeout", "must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be at least 1"));
        }
        if self.ban_pause_threshold == Some(0) {
            return Err(invalid("ban_pause_threshold", "must be at least 1"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = JobConfig::default();
        assert_eq!(config.bots, 1);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_bots_rejected() {
        let config = JobConfig {
            bots: 0,
            ..JobConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "bots"
        ));
    }

    #[test]
    fn zero_tick_rejected() {
        let config = JobConfig {
            tick_interval: Duration::ZERO,
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_env_reads_overrides() {
        // SAFETY: no other test reads or writes PROBE_* variables.
        unsafe {
            std::env::set_var("PROBE_BOTS", "12");
            std::env::set_var("PROBE_TASK_TIMEOUT_MS", "1500");
            std::env::set_var("PROBE_USE_PROXIES", "true");
            std::env::set_var("PROBE_MAX_RETRIES", "not-a-number");
        }
        let config = JobConfig::from_env();
        unsafe {
            std::env::remove_var("PROBE_BOTS");
            std::env::remove_var("PROBE_TASK_TIMEOUT_MS");
            std::env::remove_var("PROBE_USE_PROXIES");
            std::env::remove_var("PROBE_MAX_RETRIES");
        }
        assert_eq!(config.bots, 12);
        assert_eq!(config.task_timeout, Duration::from_millis(1500));
        assert!(config.use_proxies);
        assert_eq!(config.max_retries, 3);
    }
}

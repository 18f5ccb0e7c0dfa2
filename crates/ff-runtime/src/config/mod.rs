//! Scheduler configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. User's config file named by `FF_CONFIG_RS` at build time
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use ff_runtime::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .stack_size(128 * 1024)
//!     .timeout_scan_interval(Duration::from_millis(10));
//! ```

pub mod defaults;

use std::fmt;
use std::time::Duration;

use ff_core::constants::MIN_STACK_SIZE;
use ff_core::env::{env_get, env_get_bool, env_get_ms};
use thiserror::Error;

/// Order in which runnable fibers leave the run-queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunQueueOrder {
    /// Oldest scheduled fiber runs first
    Fifo,
    /// Most recently scheduled fiber runs first
    Lifo,
}

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Usable stack per fiber when `spawn` is given 0
    pub stack_size: usize,
    pub run_queue_order: RunQueueOrder,
    /// Upper bound on thread pool OS threads
    pub threadpool_max_threads: usize,
    /// How long an idle pool thread sleeps before re-checking for shutdown
    pub threadpool_park_timeout: Duration,
    /// Upper bound on fiber pool worker fibers
    pub fiberpool_max_fibers: usize,
    /// Bound of the fiber pool task queue
    pub fiberpool_queue_capacity: usize,
    /// Period of the timeout checker tick
    pub timeout_scan_interval: Duration,
    /// Hint passed to the completion port
    pub port_concurrency: usize,
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Compiled defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FF_STACK_SIZE` - bytes per fiber stack
    /// - `FF_RUN_QUEUE_LIFO` - LIFO run-queue (0/1)
    /// - `FF_THREADPOOL_MAX_THREADS`
    /// - `FF_THREADPOOL_PARK_TIMEOUT_MS`
    /// - `FF_FIBERPOOL_MAX_FIBERS`
    /// - `FF_FIBERPOOL_QUEUE_CAPACITY`
    /// - `FF_TIMEOUT_SCAN_INTERVAL_MS`
    /// - `FF_PORT_CONCURRENCY`
    /// - `FF_DEBUG` - debug logging (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        let lifo = env_get_bool(
            "FF_RUN_QUEUE_LIFO",
            base.run_queue_order == RunQueueOrder::Lifo,
        );
        Self {
            stack_size: env_get("FF_STACK_SIZE", base.stack_size),
            run_queue_order: if lifo { RunQueueOrder::Lifo } else { RunQueueOrder::Fifo },
            threadpool_max_threads: env_get(
                "FF_THREADPOOL_MAX_THREADS",
                base.threadpool_max_threads,
            ),
            threadpool_park_timeout: env_get_ms(
                "FF_THREADPOOL_PARK_TIMEOUT_MS",
                base.threadpool_park_timeout,
            ),
            fiberpool_max_fibers: env_get("FF_FIBERPOOL_MAX_FIBERS", base.fiberpool_max_fibers),
            fiberpool_queue_capacity: env_get(
                "FF_FIBERPOOL_QUEUE_CAPACITY",
                base.fiberpool_queue_capacity,
            ),
            timeout_scan_interval: env_get_ms(
                "FF_TIMEOUT_SCAN_INTERVAL_MS",
                base.timeout_scan_interval,
            ),
            port_concurrency: env_get("FF_PORT_CONCURRENCY", base.port_concurrency),
            debug_logging: env_get_bool("FF_DEBUG", base.debug_logging),
        }
    }

    /// Compiled defaults only, no environment lookups
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            run_queue_order: if defaults::RUN_QUEUE_LIFO {
                RunQueueOrder::Lifo
            } else {
                RunQueueOrder::Fifo
            },
            threadpool_max_threads: defaults::THREADPOOL_MAX_THREADS,
            threadpool_park_timeout: Duration::from_millis(defaults::THREADPOOL_PARK_TIMEOUT_MS),
            fiberpool_max_fibers: defaults::FIBERPOOL_MAX_FIBERS,
            fiberpool_queue_capacity: defaults::FIBERPOOL_QUEUE_CAPACITY,
            timeout_scan_interval: Duration::from_millis(defaults::TIMEOUT_SCAN_INTERVAL_MS),
            port_concurrency: defaults::PORT_CONCURRENCY,
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn run_queue_order(mut self, order: RunQueueOrder) -> Self {
        self.run_queue_order = order;
        self
    }

    pub fn threadpool_max_threads(mut self, n: usize) -> Self {
        self.threadpool_max_threads = n;
        self
    }

    pub fn threadpool_park_timeout(mut self, d: Duration) -> Self {
        self.threadpool_park_timeout = d;
        self
    }

    pub fn fiberpool_max_fibers(mut self, n: usize) -> Self {
        self.fiberpool_max_fibers = n;
        self
    }

    pub fn fiberpool_queue_capacity(mut self, cap: usize) -> Self {
        self.fiberpool_queue_capacity = cap;
        self
    }

    pub fn timeout_scan_interval(mut self, d: Duration) -> Self {
        self.timeout_scan_interval = d;
        self
    }

    pub fn port_concurrency(mut self, n: usize) -> Self {
        self.port_concurrency = n;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 16KB"));
        }
        if self.threadpool_max_threads == 0 {
            return Err(ConfigError::InvalidValue("threadpool_max_threads must be > 0"));
        }
        if self.threadpool_park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("threadpool_park_timeout must be > 0"));
        }
        if self.fiberpool_max_fibers == 0 {
            return Err(ConfigError::InvalidValue("fiberpool_max_fibers must be > 0"));
        }
        if self.fiberpool_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("fiberpool_queue_capacity must be > 0"));
        }
        if self.timeout_scan_interval.is_zero() {
            return Err(ConfigError::InvalidValue("timeout_scan_interval must be > 0"));
        }
        if self.port_concurrency == 0 {
            return Err(ConfigError::InvalidValue("port_concurrency must be > 0"));
        }
        Ok(())
    }
}

impl fmt::Display for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ff scheduler configuration:")?;
        writeln!(f, "  stack_size:                {}", self.stack_size)?;
        writeln!(f, "  run_queue_order:           {:?}", self.run_queue_order)?;
        writeln!(f, "  threadpool_max_threads:    {}", self.threadpool_max_threads)?;
        writeln!(f, "  threadpool_park_timeout:   {:?}", self.threadpool_park_timeout)?;
        writeln!(f, "  fiberpool_max_fibers:      {}", self.fiberpool_max_fibers)?;
        writeln!(f, "  fiberpool_queue_capacity:  {}", self.fiberpool_queue_capacity)?;
        writeln!(f, "  timeout_scan_interval:     {:?}", self.timeout_scan_interval)?;
        writeln!(f, "  port_concurrency:          {}", self.port_concurrency)?;
        write!(f, "  debug_logging:             {}", self.debug_logging)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

impl From<ConfigError> for ff_core::FfError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => ff_core::FfError::Config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SchedulerConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.run_queue_order, RunQueueOrder::Fifo);
        assert!(config.stack_size >= MIN_STACK_SIZE);
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .run_queue_order(RunQueueOrder::Lifo)
            .timeout_scan_interval(Duration::from_millis(5))
            .fiberpool_max_fibers(3);
        assert_eq!(config.run_queue_order, RunQueueOrder::Lifo);
        assert_eq!(config.timeout_scan_interval, Duration::from_millis(5));
        assert_eq!(config.fiberpool_max_fibers, 3);
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::new().stack_size(1024).validate().is_err());
        assert!(SchedulerConfig::new().threadpool_max_threads(0).validate().is_err());
        let err = SchedulerConfig::new()
            .timeout_scan_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid config: timeout_scan_interval must be > 0"
        );
    }

    #[test]
    fn test_display_lists_fields() {
        let text = SchedulerConfig::new().to_string();
        assert!(text.contains("run_queue_order"));
        assert!(text.contains("Fifo"));
    }
}

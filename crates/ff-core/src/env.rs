//! Environment variable helpers
//!
//! Used by `SchedulerConfig::from_env` to layer runtime overrides on top of
//! the compiled defaults.
//!
//! # Usage
//!
//! ```ignore
//! use ff_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let stack: usize = env_get("FF_STACK_SIZE", 256 * 1024);
//! let lifo = env_get_bool("FF_RUN_QUEUE_LIFO", false);
//! let scan = env_get_ms("FF_TIMEOUT_SCAN_INTERVAL_MS", Duration::from_millis(100));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or malformed
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean variable: "1", "true", "yes", "on" (any case) are true,
/// anything else set is false, unset gives `default`
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Whole milliseconds as a `Duration`
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Set to anything, including the empty string
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

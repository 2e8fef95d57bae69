//! # Runtime Configuration Module
//!
//! Environment-driven settings for the dispatch bridge.
//!
//! ## Environment Variables
//!
//! ### `PROCGATE_STACK_SIZE`
//!
//! Stack size for the `may` coroutines that serve HTTP requests. Accepts decimal
//! (`65536`) or hexadecimal (`0x10000`). Default: `0x10000` (64 KB).
//!
//! ### `PROCGATE_RELAY_STACK_SIZE`
//!
//! Stack size for stream relay threads, same format. Default: `0x10000` (64 KB).
//! Relays only hold a line buffer, so small stacks are fine.
//!
//! ### `PROCGATE_DISPATCH_STACK_SIZE`
//!
//! Stack size for the threads that run one dispatch each, same format. The
//! process-execution collaborator runs here. Default: `0x200000` (2 MB).
//!
//! ### `PROCGATE_CAPTURE`
//!
//! Process-wide override of output capture:
//! - `route` (default): capture only for routes with `debug: true`
//! - `always`: capture for every route
//! - `never`: never capture, even for debug routes
//!
//! Unparseable values fall back to the defaults.
//!
//! ## Usage
//!
//! ```rust
//! use procgate::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Relay stack size: {} bytes", config.relay_stack_size);
//! ```

use std::env;

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_DISPATCH_STACK_SIZE: usize = 0x200000;

/// When to capture process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Follow the route's `debug` flag.
    #[default]
    Route,
    Always,
    Never,
}

impl CaptureMode {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "route" => Some(Self::Route),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Whether a dispatch for a route with the given debug flag captures output.
    #[must_use]
    pub fn captures(self, route_debug: bool) -> bool {
        match self {
            Self::Route => route_debug,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for HTTP coroutines in bytes
    pub stack_size: usize,
    /// Stack size for relay threads in bytes
    pub relay_stack_size: usize,
    /// Stack size for dispatch threads in bytes
    pub dispatch_stack_size: usize,
    pub capture: CaptureMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            relay_stack_size: DEFAULT_STACK_SIZE,
            dispatch_stack_size: DEFAULT_DISPATCH_STACK_SIZE,
            capture: CaptureMode::Route,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            stack_size: lookup("PROCGATE_STACK_SIZE")
                .and_then(|v| parse_size(&v))
                .unwrap_or(defaults.stack_size),
            relay_stack_size: lookup("PROCGATE_RELAY_STACK_SIZE")
                .and_then(|v| parse_size(&v))
                .unwrap_or(defaults.relay_stack_size),
            dispatch_stack_size: lookup("PROCGATE_DISPATCH_STACK_SIZE")
                .and_then(|v| parse_size(&v))
                .unwrap_or(defaults.dispatch_stack_size),
            capture: lookup("PROCGATE_CAPTURE")
                .and_then(|v| CaptureMode::parse(&v))
                .unwrap_or(defaults.capture),
        }
    }

    /// Apply the coroutine stack size to the `may` runtime. Call before the
    /// server starts.
    pub fn configure_may(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}

/// Parse a byte size given in decimal or `0x`-prefixed hexadecimal.
#[must_use]
pub fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.relay_stack_size, 0x10000);
        assert_eq!(config.dispatch_stack_size, 0x200000);
        assert_eq!(config.capture, CaptureMode::Route);
    }

    #[test]
    fn test_hex_and_decimal_sizes() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("PROCGATE_STACK_SIZE", "0x8000"),
            ("PROCGATE_RELAY_STACK_SIZE", "32768"),
            ("PROCGATE_DISPATCH_STACK_SIZE", "0x100000"),
        ]));
        assert_eq!(config.stack_size, 0x8000);
        assert_eq!(config.relay_stack_size, 32768);
        assert_eq!(config.dispatch_stack_size, 0x100000);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("PROCGATE_STACK_SIZE", "0xZZ"),
            ("PROCGATE_CAPTURE", "sometimes"),
        ]));
        assert_eq!(config.stack_size, 0x10000);
        assert_eq!(config.capture, CaptureMode::Route);
    }

    #[test]
    fn test_capture_mode() {
        assert_eq!(CaptureMode::parse(" Always "), Some(CaptureMode::Always));
        assert!(CaptureMode::Route.captures(true));
        assert!(!CaptureMode::Route.captures(false));
        assert!(CaptureMode::Always.captures(false));
        assert!(!CaptureMode::Never.captures(true));
    }
}

//! Switchyard Logging Setup
//!
//! Installs a `tracing` subscriber configured from `SWITCHYARD_*`
//! environment variables. The event bus itself only emits `tracing` events;
//! this crate decides where they go.
//!
//! # Usage
//!
//! ```rust
//! // Reads the environment once and installs the global subscriber.
//! switchyard_log::init();
//!
//! tracing::info!(topic = "user:42:updated", "Emitting event");
//! ```
//!
//! # Environment Variables
//!
//! - `SWITCHYARD_DEBUG=1` - Enable debug logging
//! - `SWITCHYARD_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `SWITCHYARD_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `SWITCHYARD_LOG_COLOR=1|0` - Enable/disable colors
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use once_cell::sync::OnceCell;
use std::env;

pub const ENV_DEBUG: &str = "SWITCHYARD_DEBUG";
pub const ENV_LOG_LEVEL: &str = "SWITCHYARD_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SWITCHYARD_LOG_FORMAT";
pub const ENV_LOG_COLOR: &str = "SWITCHYARD_LOG_COLOR";

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level written by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag(ENV_DEBUG).unwrap_or(false);

        let level = lookup(ENV_LOG_LEVEL)
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        // JSON output never carries escape codes
        let color = format != Format::Json
            && flag(ENV_LOG_COLOR)
                .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
        }
    }

    /// Install the global subscriber for this configuration.
    ///
    /// Returns `false` if a global subscriber was already installed.
    pub fn install(&self) -> bool {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()));
        let registry = tracing_subscriber::registry().with(filter);
        let layer = fmt::layer().with_writer(std::io::stderr).with_ansi(self.color);

        let result = match self.format {
            Format::Pretty => registry.with(layer.pretty()).try_init(),
            Format::Compact => registry.with(layer.compact()).try_init(),
            #[cfg(feature = "json")]
            Format::Json => registry.with(layer.json()).try_init(),
            #[cfg(not(feature = "json"))]
            Format::Json => registry.with(layer).try_init(),
        };

        result.is_ok()
    }
}

// ============================================================================
// Public API
// ============================================================================

static CONFIG: OnceCell<LogConfig> = OnceCell::new();

/// Initialize logging from the environment.
///
/// Only the first call reads the environment and installs the subscriber;
/// later calls are no-ops.
pub fn init() {
    CONFIG.get_or_init(|| {
        let config = LogConfig::from_env();
        if !config.install() {
            tracing::debug!("Global tracing subscriber already installed");
        }
        config
    });
}

/// The configuration resolved by [`init`], if it has run.
pub fn config() -> Option<&'static LogConfig> {
    CONFIG.get()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("invalid"), None);
        assert_eq!(Level::Warn.to_string(), "warn");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("compact"), Some(Format::Compact));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[(ENV_DEBUG, "true")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[(ENV_DEBUG, "1"), (ENV_LOG_LEVEL, "warn")]));
        assert_eq!(config.level, Level::Warn);
    }

    #[test]
    fn test_color_only_for_text_formats() {
        let config = LogConfig::from_lookup(lookup(&[(ENV_LOG_COLOR, "1")]));
        assert!(!config.color);

        let config = LogConfig::from_lookup(lookup(&[
            (ENV_LOG_FORMAT, "pretty"),
            (ENV_LOG_COLOR, "1"),
        ]));
        assert_eq!(config.format, Format::Pretty);
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[
            (ENV_LOG_FORMAT, "compact"),
            ("NO_COLOR", "1"),
            ("TERM", "xterm"),
        ]));
        assert!(!config.color);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        init();
        init();
        assert!(config().is_some());
        tracing::info!(target: "switchyard::test", "logging initialized");
    }
}

//! Logging setup
//!
//! All modules log through the `log` facade. The binary installs
//! `env_logger`; `RUST_LOG` wins over the configured level.

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Install the global logger. `debug` forces at least debug level.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(configured: &str, debug: bool) {
    let level = LogLevel::from_str(configured).unwrap_or(LogLevel::Info);
    let level = if debug { level.max(LogLevel::Debug) } else { level };

    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str()),
    )
    .format_timestamp_millis()
    .try_init();
}

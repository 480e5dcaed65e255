//! Logging bootstrap for tenantry.
//!
//! Library code logs through `tracing` and never installs a subscriber on its
//! own. Applications without one can call [`init`], which reads:
//!
//! - `TENANTRY_DEBUG=true|1|yes` - debug level, and enables [`tenantry_debug!`]
//! - `TENANTRY_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `TENANTRY_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! or build [`LogSettings`] directly and call [`init_with`]. Installing the
//! subscriber requires the `tracing-subscriber` feature.
//!
//! ```rust,no_run
//! use tenantry_core::logging::{self, LogFormat, LogSettings};
//!
//! logging::init_with(LogSettings::new(tracing::Level::INFO).with_format(LogFormat::Compact));
//! ```
//!
//! Fields used throughout the crate:
//!
//! ```rust,ignore
//! info!(schema = %schema, backend = %kind, "Created tenant connection");
//! warn!(strategy = %strategy, error = %e, "Tenant resolution failed");
//! ```

use std::env;
use std::fmt;
use std::sync::{Once, OnceLock};

use tracing::Level;

/// Crates whose spans and events the installed filter lets through.
pub const TENANTRY_CRATES: &[&str] = &[
    "tenantry",
    "tenantry_core",
    "tenantry_postgres",
    "tenantry_sqlx",
    "tenantry_axum",
];

static INIT: Once = Once::new();
static DEBUG: OnceLock<bool> = OnceLock::new();

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// Single-line, human oriented.
    Compact,
}

impl LogFormat {
    /// Parse a format name, case-insensitively. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}

/// What [`init_with`] installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Maximum level for the tenantry crates.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Settings at `level` with the default format.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::default(),
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Read settings from the environment.
    ///
    /// Returns `None` when neither `TENANTRY_DEBUG` nor `TENANTRY_LOG_LEVEL`
    /// is set, so that [`init`] stays silent by default.
    pub fn from_env() -> Option<Self> {
        Self::from_values(
            env::var("TENANTRY_DEBUG").ok().as_deref(),
            env::var("TENANTRY_LOG_LEVEL").ok().as_deref(),
            env::var("TENANTRY_LOG_FORMAT").ok().as_deref(),
        )
    }

    fn from_values(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Option<Self> {
        let debug = debug.is_some_and(parse_flag);
        if !debug && level.is_none() {
            return None;
        }

        let fallback = if debug { Level::DEBUG } else { Level::WARN };
        let level = level
            .and_then(|l| l.trim().parse::<Level>().ok())
            .unwrap_or(fallback);
        let format = format.and_then(LogFormat::parse).unwrap_or_default();
        Some(Self { level, format })
    }

    /// The `EnvFilter` directive for these settings.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        TENANTRY_CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Whether `TENANTRY_DEBUG` is enabled. Read once per process.
#[inline]
pub fn is_debug_enabled() -> bool {
    *DEBUG.get_or_init(|| {
        env::var("TENANTRY_DEBUG")
            .map(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

/// Install a subscriber configured from the environment.
///
/// Does nothing unless `TENANTRY_DEBUG` or `TENANTRY_LOG_LEVEL` is set.
pub fn init() {
    if let Some(settings) = LogSettings::from_env() {
        init_with(settings);
    }
}

/// Install a global subscriber with explicit settings.
///
/// Only the first call in a process has an effect. Returns whether this call
/// installed the subscriber; always `false` without the `tracing-subscriber`
/// feature or when another global subscriber is already set.
pub fn init_with(settings: LogSettings) -> bool {
    let mut installed = false;
    INIT.call_once(|| installed = install(settings));
    installed
}

#[cfg(feature = "tracing-subscriber")]
fn install(settings: LogSettings) -> bool {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(settings.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };

    if result.is_ok() {
        tracing::info!(
            level = %settings.level,
            format = %settings.format,
            "Tenantry logging initialized"
        );
    }
    result.is_ok()
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_settings: LogSettings) -> bool {
    false
}

/// Debug logging only when `TENANTRY_DEBUG` is enabled.
#[macro_export]
macro_rules! tenantry_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

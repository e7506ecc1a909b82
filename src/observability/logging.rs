//! Structured logging for the edge agent
//!
//! The subscriber is configured from the environment:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO (default), DEBUG or TRACE
//! - `LOG_FORMAT`: `json` (default), `pretty` or `compact`
//! - `LOG_SPANS`: `true` adds span open/close events
//! - `RUST_LOG`: replaces the computed filter entirely
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG edge-agent run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Dependencies that are only interesting when something goes wrong
const QUIET_TARGETS: &[&str] = &["rumqttc", "sqlx", "hyper", "reqwest", "tokio"];

/// Subscriber settings resolved from `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl LogSettings {
    /// Resolve settings from raw variable values; unknown values fall back
    /// to INFO, JSON and no span events
    pub fn from_values(level: Option<&str>, format: Option<&str>, spans: Option<&str>) -> Self {
        let level = match level.map(str::to_ascii_uppercase).as_deref() {
            Some("ERROR") => Level::ERROR,
            Some("WARN") => Level::WARN,
            Some("DEBUG") => Level::DEBUG,
            Some("TRACE") => Level::TRACE,
            _ => Level::INFO,
        };
        let format = match format.map(str::to_ascii_lowercase).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        };
        let include_spans = spans.is_some_and(|v| v.eq_ignore_ascii_case("true"));
        Self {
            level,
            format,
            include_spans,
        }
    }

    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok();
        Self::from_values(
            var("LOG_LEVEL").as_deref(),
            var("LOG_FORMAT").as_deref(),
            var("LOG_SPANS").as_deref(),
        )
    }

    /// Directive string used when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let mut directives = self.level.to_string().to_lowercase();
        for target in QUIET_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
        directives
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the computed filter
pub fn init_logging(settings: LogSettings) {
    let filter = env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(settings.directives()));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_span_events(settings.span_events());

    match settings.format {
        LogFormat::Json => registry.with(layer.json()).init(),
        LogFormat::Pretty => registry.with(layer.pretty().with_ansi(true)).init(),
        LogFormat::Compact => registry
            .with(layer.compact().with_ansi(true).with_target(false))
            .init(),
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    init_logging(LogSettings::from_env());
}

/// Create a span around one connect or reconnect attempt
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("session_attempt", $($field)*)
    };
}

pub use session_span;

//! Subscriber settings read from `SQLHA_*` variables.

use std::env;
use std::str::FromStr;

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to compact output.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Settings handed to [`init_tracing`](super::init_tracing).
///
/// A filter left unset by the environment stays `None` so a host can supply
/// its own default (the simulator derives one from `-v`).
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    log_format: LogFormat,
    log_filter: Option<String>,
    include_location: bool,
}

impl TracingConfig {
    /// Reads `SQLHA_LOG_FORMAT`, `SQLHA_LOG_LEVEL` (then `RUST_LOG`) and
    /// `SQLHA_LOG_LOCATION`.
    ///
    /// Without a format, a terminal gets pretty output and anything else gets
    /// JSON lines.
    pub fn from_env() -> Self {
        let log_format = env::var("SQLHA_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_else(|| {
                if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                    LogFormat::Pretty
                } else {
                    LogFormat::Json
                }
            });

        Self {
            log_format,
            log_filter: env::var("SQLHA_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .ok(),
            include_location: env::var("SQLHA_LOG_LOCATION")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    /// Uses `filter` unless directives were already set.
    pub fn or_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter.get_or_insert_with(|| filter.into());
        self
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter directives, `info` when nothing was set.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or("info")
    }

    pub fn include_location(&self) -> bool {
        self.include_location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("bogus".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }

    #[test]
    fn fallback_filter_applies_only_when_unset() {
        let unset = TracingConfig::default();
        assert_eq!(unset.log_filter(), "info");
        assert_eq!(unset.or_filter("debug").log_filter(), "debug");

        let set = TracingConfig {
            log_filter: Some("warn,sqlha_cluster=trace".to_string()),
            ..TracingConfig::default()
        };
        assert_eq!(set.or_filter("debug").log_filter(), "warn,sqlha_cluster=trace");
    }
}

//! Tracing subscriber setup.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Tracing output of the resolution engine.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: Level,
    /// Extra filter directives, e.g. `rvoip_transmitter_core::dns=trace`.
    pub directives: Vec<String>,
    pub json: bool,
    /// Include file and line of each event.
    pub file_info: bool,
    /// Report span enter and exit.
    pub log_spans: bool,
    /// Name reported in the startup event.
    pub component: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            directives: Vec::new(),
            json: false,
            file_info: false,
            log_spans: false,
            component: "rvoip-transmitter".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, component: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            component: component.into(),
            ..Default::default()
        }
    }

    /// Adds a filter directive such as `rvoip_transmitter_core::transmitter=debug`.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        for directive in &self.directives {
            let parsed = directive
                .parse()
                .map_err(|e| Error::Configuration(format!("invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install a global subscriber for the resolution engine's tracing output.
///
/// Fails with [`Error::Configuration`] if a global subscriber is already set.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Configuration(format!("logging already initialized: {}", e)))?;

    tracing::debug!(component = %config.component, "logging initialized");
    Ok(())
}

/// Parses `trace`, `debug`, `info`, `warn` or `error`, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Configuration(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_builder_flags() {
        let config = LoggingConfig::new(Level::TRACE, "probe").with_json().with_spans();
        assert!(config.json);
        assert!(config.log_spans);
        assert!(!config.file_info);
        assert_eq!(config.component, "probe");
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        let config = LoggingConfig::default().with_directive("rvoip_transmitter_core::dns=loudest");
        assert!(matches!(config.env_filter(), Err(Error::Configuration(_))));
        let config = LoggingConfig::default().with_directive("rvoip_transmitter_core::dns=trace");
        assert!(config.env_filter().is_ok());
    }
}

//! # strand-telemetry
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from the
//! configured level (`RUST_LOG` wins when set) feeding a compact or JSON
//! `fmt` layer on stderr.

#![deny(unsafe_code)]

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive, e.g. `info` or `warn,strand_sync=debug`.
    pub level: String,
    /// Per-module level overrides appended to `level`.
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive combining `level` and `module_levels`.
    pub fn directive(&self) -> String {
        let mut directive = self.level.trim().to_lowercase();
        if directive.is_empty() {
            directive.push_str("info");
        }
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        directive
    }
}

/// Initialize the global subscriber. Call once at startup; a second call
/// returns an error and leaves the first subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let directive = config.directive();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("strand-telemetry: invalid log level {directive:?}: {e}");
            EnvFilter::new("info")
        })
    });

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_is_info() {
        assert_eq!(TelemetryConfig::default().directive(), "info");
    }

    #[test]
    fn module_levels_are_appended() {
        let config = TelemetryConfig {
            level: "WARN".into(),
            module_levels: vec![("strand_sync".into(), Level::DEBUG)],
            json: true,
        };
        assert_eq!(config.directive(), "warn,strand_sync=debug");
    }

    #[test]
    fn blank_level_falls_back_to_info() {
        let config = TelemetryConfig {
            level: "  ".into(),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.directive(), "info");
    }

    #[test]
    fn second_init_is_rejected() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(init_telemetry(&config).is_err());
    }
}

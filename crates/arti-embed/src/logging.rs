//! Configure a tracing subscriber for an embedded Tor client.
//!
//! Hosts usually have no terminal to print to, and may already have
//! installed a subscriber of their own.  So installing ours is best-effort:
//! if a global subscriber is already in place, we leave it alone.

use std::str::FromStr;

use derive_builder::Builder;
use serde::Deserialize;
use tor_config::ConfigBuildError;
use tracing::debug;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

/// Structure to hold our logging configuration options.
#[derive(Debug, Clone, Builder, Deserialize, Eq, PartialEq)]
#[builder(build_fn(validate = "Self::validate", error = "ConfigBuildError"))]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filtering directives that determine tracing levels as described at
    /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#impl-FromStr>
    ///
    /// Example: "info,tor_bootstrap=debug"
    #[builder(default = "default_console_filter()", setter(into))]
    #[serde(default = "default_console_filter")]
    console: String,
}

/// Return the default tracing filter for the console.
fn default_console_filter() -> String {
    "info".to_owned()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            console: default_console_filter(),
        }
    }
}

impl LoggingConfig {
    /// Return a new builder for this type.
    pub fn builder() -> LoggingConfigBuilder {
        LoggingConfigBuilder::default()
    }

    /// Return the console filter directives.
    pub fn console(&self) -> &str {
        &self.console
    }

    /// Parse the console filter directives.
    fn filter(&self) -> Result<Targets, ConfigBuildError> {
        parse_filter(&self.console)
    }
}

impl LoggingConfigBuilder {
    /// Check that the filter directives in this builder parse.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if let Some(console) = &self.console {
            parse_filter(console)?;
        }
        Ok(())
    }
}

/// Parse `s` as a set of filter directives for the `console` option.
fn parse_filter(s: &str) -> Result<Targets, ConfigBuildError> {
    Targets::from_str(s).map_err(|e| ConfigBuildError::Invalid {
        field: "console".to_owned(),
        problem: e.to_string(),
    })
}

/// Install a global subscriber that logs to stderr according to `config`.
///
/// Returns `Ok(true)` if the subscriber was installed, and `Ok(false)` if a
/// global subscriber was already in place (ours, from an earlier call, or the
/// host's).  Fails only if `config` holds filter directives that do not parse.
pub fn setup_logging(config: &LoggingConfig) -> Result<bool, ConfigBuildError> {
    let filter = config.filter()?;
    let layer = fmt::Layer::default()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let installed = registry().with(layer).try_init().is_ok();
    if installed {
        debug!("Logging initialized with filter {:?}", config.console);
    }
    Ok(installed)
}

//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATE_TARGETS: [&str; 2] = ["relay_core", "tests"];

fn scoped_filter(level: &str) -> EnvFilter {
    let directives: Vec<String> =
        CRATE_TARGETS.iter().map(|target| format!("{target}={level}")).collect();
    EnvFilter::new(format!("warn,{}", directives.join(",")))
}

/// Builds the log filter.
///
/// `RUST_LOG=debug` and `RUST_LOG=trace` are shortcuts scoped to this crate's targets, so
/// dependencies stay at `warn`. Any other `RUST_LOG` value is used as a full directive
/// string. Without `RUST_LOG`, the configured level applies.
#[must_use]
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(value) if value == "debug" || value == "trace" => scoped_filter(&value),
        Ok(_) => EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| scoped_filter("debug")),
        Err(_) => scoped_filter(&config.level),
    }
}

/// Installs the global tracing subscriber.
///
/// Returns `false` if a subscriber was already installed, which is expected when several
/// gateways or tests share a process.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    if config.format.as_str() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        registry.with(fmt_layer).try_init().is_ok()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).try_init().is_ok()
    }
}

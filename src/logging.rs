//! Tracing subscriber setup.
//!
//! Logs go to stderr so command reports on stdout stay clean. `RUST_LOG`
//! overrides the configured filter.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

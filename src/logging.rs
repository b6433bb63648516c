//! Tracing setup for the CLI.

use tracing_subscriber::{EnvFilter, fmt};

/// Map a `LOG_LEVEL` value (DEBUG/INFO/WARNING/ERROR) to a filter directive.
pub fn directive(log_level: &str) -> &'static str {
    match log_level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`; noisy
/// dependencies stay at `warn`. Logs go to stderr so stdout carries only the
/// run summary.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,prime_brief={}", directive(log_level)))
    });

    // A second init (tests, embedding) keeps the first subscriber
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_maps_log_level_names() {
        assert_eq!(directive("WARNING"), "warn");
        assert_eq!(directive("debug"), "debug");
        assert_eq!(directive("ERROR"), "error");
        assert_eq!(directive("INFO"), "info");
        assert_eq!(directive("nonsense"), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("INFO");
        init("DEBUG");
    }
}

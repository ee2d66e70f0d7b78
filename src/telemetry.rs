//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies. Logs go
//! to stderr (plain or JSON) so command output on stdout stays clean, and
//! optionally to a daily-rotated JSON file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingSection;

pub const LOG_FILE_PREFIX: &str = "draftline.log";

fn fallback_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. Safe to call twice; the second call is a
/// no-op. Keep the returned guard alive for as long as file logs should be
/// flushed.
pub fn init(logging: &LoggingSection, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose {
        "debug"
    } else {
        fallback_level(&logging.level)
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if logging.json {
        layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    let guard = logging.dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard
    });

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_level() {
        assert_eq!(fallback_level(" WARN "), "warn");
        assert_eq!(fallback_level("nonsense"), "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let logging = LoggingSection {
            level: "debug".to_string(),
            json: true,
            dir: Some(dir.path().to_path_buf()),
        };
        let _first = init(&logging, false);
        let _second = init(&LoggingSection::default(), true);
    }
}

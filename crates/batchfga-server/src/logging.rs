//! Subscriber setup for batch check logging.
//!
//! Batch evaluation runs inside an `execute` span carrying `store_id` and
//! `checks`. The JSON format attaches those span fields to every event
//! emitted while a batch runs:
//!
//! ```json
//! {"timestamp":"...","level":"DEBUG","fields":{"message":"deduplicated batch","unique_checks":2,"duplicates":1},"target":"batchfga_server::handlers::batch::handler","span":{"store_id":"store-1","checks":3,"name":"execute"}}
//! ```
//!
//! The configured level applies to the batchfga crates only; everything else
//! (moka, config) is held at `warn`. `RUST_LOG` replaces the whole filter.
//!
//! Servers normally install logging through [`ServerConfig::init_logging`].
//!
//! [`ServerConfig::init_logging`]: crate::config::ServerConfig::init_logging

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    prelude::*,
    EnvFilter,
};

const LOGGED_CRATES: [&str; 2] = ["batchfga_server", "batchfga_domain"];

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// JSON lines instead of human readable output.
    pub json_format: bool,
    /// Level for the batchfga crates when `RUST_LOG` is unset.
    pub level: Level,
    /// Emit a close event with busy/idle timings for every span.
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            json_format: false,
            level,
            span_timings: false,
        }
    }

    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    pub fn with_span_timings(mut self, span_timings: bool) -> Self {
        self.span_timings = span_timings;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn filter_directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        LOGGED_CRATES
            .iter()
            .fold(String::from("warn"), |mut directives, target| {
                directives.push_str(&format!(",{target}={level}"));
                directives
            })
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Installs the process-wide subscriber writing to stdout.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));
    let subscriber = build_subscriber(config, filter, std::io::stdout, true);
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

/// Builds a subscriber for `config` writing to `writer`, ignoring `RUST_LOG`.
///
/// Used to capture batch logs without touching the global subscriber.
pub fn subscriber_with_writer<W>(
    config: &LoggingConfig,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::new(config.filter_directives());
    build_subscriber(config, filter, writer, false)
}

fn build_subscriber<W>(
    config: &LoggingConfig,
    filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(config.span_events())
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            ),
        )
    } else {
        Box::new(
            registry.with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_span_events(config.span_events())
                    .with_target(true),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info, info_span};

    /// A writer that captures output to a shared buffer.
    #[derive(Clone, Default)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
        }

        fn json_lines(&self) -> Vec<serde_json::Value> {
            self.output()
                .lines()
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str(line)
                        .unwrap_or_else(|e| panic!("log line should be JSON: {line} ({e})"))
                })
                .collect()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn emit_batch_events() {
        let span = info_span!("execute", store_id = "store-1", checks = 3);
        let _entered = span.enter();
        debug!(unique_checks = 2, duplicates = 1, "deduplicated batch");
        info!(target: "moka::cache", "evicted entries");
    }

    #[test]
    fn test_level_applies_to_batchfga_crates_only() {
        let config = LoggingConfig::new(Level::DEBUG);
        assert_eq!(
            config.filter_directives(),
            "warn,batchfga_server=debug,batchfga_domain=debug"
        );
        assert_eq!(LoggingConfig::default().level, Level::INFO);
    }

    #[test]
    fn test_json_events_carry_batch_span_fields() {
        let writer = CaptureWriter::default();
        let config = LoggingConfig::new(Level::DEBUG).with_json(true);

        let subscriber = subscriber_with_writer(&config, writer.clone());
        tracing::subscriber::with_default(subscriber, emit_batch_events);

        let lines = writer.json_lines();
        assert_eq!(lines.len(), 1, "dependency events below warn are filtered");
        let line = &lines[0];
        assert_eq!(line["level"], "DEBUG");
        assert_eq!(line["fields"]["unique_checks"], 2);
        assert_eq!(line["span"]["store_id"], "store-1");
        assert_eq!(line["span"]["checks"], 3);
        assert!(line.get("spans").is_none());
    }

    #[test]
    fn test_configured_level_drops_debug_events() {
        let writer = CaptureWriter::default();
        let config = LoggingConfig::new(Level::INFO).with_json(true);

        let subscriber = subscriber_with_writer(&config, writer.clone());
        tracing::subscriber::with_default(subscriber, emit_batch_events);

        assert!(writer.output().is_empty());
    }

    #[test]
    fn test_span_timings_emit_close_event() {
        let writer = CaptureWriter::default();
        let config = LoggingConfig::new(Level::DEBUG)
            .with_json(true)
            .with_span_timings(true);

        let subscriber = subscriber_with_writer(&config, writer.clone());
        tracing::subscriber::with_default(subscriber, emit_batch_events);

        let lines = writer.json_lines();
        let close = lines
            .iter()
            .find(|line| line["fields"]["message"] == "close")
            .expect("span close event");
        assert!(close["fields"].get("time.busy").is_some());
    }

    #[test]
    fn test_text_format_is_plain() {
        let writer = CaptureWriter::default();
        let config = LoggingConfig::new(Level::DEBUG);

        let subscriber = subscriber_with_writer(&config, writer.clone());
        tracing::subscriber::with_default(subscriber, emit_batch_events);

        let output = writer.output();
        assert!(output.contains("deduplicated batch"));
        assert!(output.contains("store_id=\"store-1\""));
        assert!(!output.contains('\u{1b}'));
    }
}

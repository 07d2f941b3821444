//! Logging setup.
//!
//! Uses `env_logger` with the level derived from the command line options.
//! Warnings and errors are additionally deduplicated: the decoder logs the
//! same complaint for every broken transmission, which on a flaky optical
//! head means the same line several times per second. Within the
//! suppression window only the first occurrence is shown; when the window
//! expires, the next occurrence reports how many were suppressed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::cli::Cli;

/// Initializes the global logger. Honors `RUST_LOG` for fine-grained
/// overrides of the level selected by the command line.
pub fn init(cli: &Cli) {
    let level = if cli.silent {
        LevelFilter::Off
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let inner = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .build();

    let max_level = inner.filter();
    let logger = DedupLogger {
        window: Duration::from_secs_f64(cli.suppress_time.max(0.0)),
        seen: Mutex::new(HashMap::new()),
        inner,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
}

struct SuppressionEntry {
    until: Instant,
    num_suppressed: u64,
}

/// Wraps the `env_logger` logger and suppresses duplicate warnings and
/// errors within a time window.
struct DedupLogger {
    inner: env_logger::Logger,
    window: Duration,
    seen: Mutex<HashMap<String, SuppressionEntry>>,
}

impl Log for DedupLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        if record.level() <= Level::Warn && !self.window.is_zero() {
            let message = record.args().to_string();
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            match seen.get_mut(&message) {
                Some(entry) if now < entry.until => {
                    entry.num_suppressed += 1;
                    return;
                }
                Some(entry) => {
                    let num_suppressed = entry.num_suppressed;
                    entry.until = now + self.window;
                    entry.num_suppressed = 0;
                    if num_suppressed > 0 {
                        self.inner.log(
                            &Record::builder()
                                .metadata(record.metadata().clone())
                                .args(format_args!(
                                    "{} (suppressed {} times before)",
                                    message, num_suppressed
                                ))
                                .module_path(record.module_path())
                                .file(record.file())
                                .line(record.line())
                                .build(),
                        );
                        return;
                    }
                }
                None => {
                    seen.insert(
                        message,
                        SuppressionEntry {
                            until: now + self.window,
                            num_suppressed: 0,
                        },
                    );
                }
            }
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush()
    }
}

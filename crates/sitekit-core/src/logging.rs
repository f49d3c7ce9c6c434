use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log severity level (mirrors tracing levels for overlay use).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single log entry for display in the on-page debug overlay.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

/// Shared ring buffer of recent entries consumed by the debug overlay.
pub type LogBuffer = Arc<Mutex<VecDeque<LogEntry>>>;

/// Create a new shared log buffer with a given capacity.
pub fn new_log_buffer(capacity: usize) -> LogBuffer {
    Arc::new(Mutex::new(VecDeque::with_capacity(capacity)))
}

const MAX_OVERLAY_LINES: usize = 500;

/// A tracing layer that pushes entries into the shared ring buffer.
struct OverlayLayer {
    buffer: LogBuffer,
    max_lines: usize,
}

impl<S: tracing::Subscriber> Layer<S> for OverlayLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = match *event.metadata().level() {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        };

        let mut visitor = MessageVisitor {
            message: None,
            fields: Vec::new(),
        };
        event.record(&mut visitor);

        let entry = LogEntry {
            level,
            target: event.metadata().target().to_string(),
            message: visitor.finish(),
        };

        if let Ok(mut buf) = self.buffer.lock() {
            if buf.len() >= self.max_lines {
                buf.pop_front();
            }
            buf.push_back(entry);
        }
    }
}

struct MessageVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match self.message {
            Some(msg) if self.fields.is_empty() => msg,
            Some(msg) => format!("{} {}", msg, self.fields.join(" ")),
            None if self.fields.is_empty() => String::new(),
            None => self.fields.join(" "),
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

/// Initialize the logging subsystem. Returns the shared buffer backing the
/// debug overlay.
///
/// Filter controlled by `SITEKIT_LOG` or `RUST_LOG` (default: `info`).
/// Output goes to stderr plus a ring buffer of `MAX_OVERLAY_LINES` entries.
pub fn init() -> LogBuffer {
    let buffer = new_log_buffer(MAX_OVERLAY_LINES);

    let filter = EnvFilter::try_from_env("SITEKIT_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let overlay_layer = OverlayLayer {
        buffer: buffer.clone(),
        max_lines: MAX_OVERLAY_LINES,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(overlay_layer)
        .init();

    buffer
}

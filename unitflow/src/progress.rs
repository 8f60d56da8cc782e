//! Human-readable progress output.
//!
//! Pipelines narrate each unit they create, bind, route or destroy to an
//! append-only sink watched by operators.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Shared handle to a progress sink.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Append-only text writer for progress output.
pub trait ProgressSink: Send + Sync {
    /// Appends text to the stream. Never fails.
    fn write(&self, text: &str);
}

/// A sink that discards all output.
///
/// Used whenever a pipeline is started without a sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn write(&self, _text: &str) {}
}

/// A sink that mirrors progress lines into tracing.
#[derive(Debug, Clone, Default)]
pub struct LoggingProgressSink {
    app: Option<String>,
}

impl LoggingProgressSink {
    /// Creates a logging sink tagged with the application name.
    #[must_use]
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
        }
    }

    /// Returns the application the lines are tagged with.
    #[must_use]
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }
}

impl ProgressSink for LoggingProgressSink {
    fn write(&self, text: &str) {
        let app = self.app().unwrap_or("-");
        for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            info!(app = %app, "{}", line);
        }
    }
}

/// A sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    buffer: RwLock<String>,
}

impl CollectingProgressSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.read().clone()
    }

    /// Returns the non-empty lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.buffer
            .read()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect()
    }

    /// Returns true if any written line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.buffer.read().contains(needle)
    }
}

impl ProgressSink for CollectingProgressSink {
    fn write(&self, text: &str) {
        self.buffer.write().push_str(text);
    }
}

/// Returns a sink that discards output.
#[must_use]
pub fn discard() -> SharedProgress {
    Arc::new(NoOpProgressSink)
}

/// Pluralizes `word` for `count`.
#[must_use]
pub fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

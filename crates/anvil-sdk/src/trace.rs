/// Diagnostic logging capability.
///
/// The worker never logs through ambient global state: components that need to
/// emit diagnostics receive a `TraceWriter` at construction. The production
/// implementation forwards to the `tracing` crate (whose subscriber is
/// configured once at startup from the CLI flags); tests inject the null or
/// collecting writers instead.
pub trait TraceWriter: Send + Sync {
    /// Log an informational message.
    fn info(&self, message: &str);

    /// Log a verbose / debug message.
    fn verbose(&self, message: &str);

    /// Log a warning message.
    fn warning(&self, message: &str);

    /// Log an error message.
    fn error(&self, message: &str);
}

/// Trace writer backed by the `tracing` crate, optionally prefixing every
/// message with a component name.
#[derive(Debug, Clone, Default)]
pub struct TracingTraceWriter {
    prefix: Option<String>,
}

impl TracingTraceWriter {
    /// Writer with no component prefix.
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Writer that prefixes every message with `name: `.
    pub fn prefixed(name: impl Into<String>) -> Self {
        Self {
            prefix: Some(name.into()),
        }
    }

    fn format(&self, message: &str) -> String {
        match &self.prefix {
            Some(name) => format!("{name}: {message}"),
            None => message.to_string(),
        }
    }
}

impl TraceWriter for TracingTraceWriter {
    fn info(&self, message: &str) {
        tracing::info!("{}", self.format(message));
    }

    fn verbose(&self, message: &str) {
        tracing::debug!("{}", self.format(message));
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", self.format(message));
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", self.format(message));
    }
}

/// A no-op trace writer that discards all messages. Useful for tests.
#[derive(Debug, Clone)]
pub struct NullTraceWriter;

impl TraceWriter for NullTraceWriter {
    fn info(&self, _message: &str) {}
    fn verbose(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// A trace writer that collects all messages into a `Vec`.
/// Useful for asserting on diagnostic output in tests.
#[derive(Debug, Default)]
pub struct CollectingTraceWriter {
    messages: parking_lot::Mutex<Vec<(TraceLevel, String)>>,
}

/// The level of a collected trace message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Info,
    Verbose,
    Warning,
    Error,
}

impl CollectingTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all collected messages.
    pub fn messages(&self) -> Vec<(TraceLevel, String)> {
        self.messages.lock().clone()
    }

    /// Whether any collected message at `level` contains `needle`.
    pub fn contains(&self, level: TraceLevel, needle: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }

    /// Clear collected messages.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn push(&self, level: TraceLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

impl TraceWriter for CollectingTraceWriter {
    fn info(&self, message: &str) {
        self.push(TraceLevel::Info, message);
    }

    fn verbose(&self, message: &str) {
        self.push(TraceLevel::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.push(TraceLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(TraceLevel::Error, message);
    }
}

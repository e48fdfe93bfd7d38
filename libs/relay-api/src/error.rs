use std::fmt;

/// Error kind for errors crossing a component seam.
///
/// Absence of an enrichment record is not an error and has no kind here:
/// stores return `Ok(None)` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store or network unreachable, timeouts. Always retryable.
    Transient,
    /// Malformed event, validation rejection. Retried under the shared budget.
    Permanent,
    /// Retry budget spent. Always terminal.
    Exhausted,
    /// Invalid configuration of a component.
    Config,
}

/// Error returned by all seam trait methods (stores, targets, sinks).
#[derive(Debug, Clone)]
pub struct RelayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RelayError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transient, message: msg.into() }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Permanent, message: msg.into() }
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Exhausted, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RelayError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → RelayError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        Self::transient(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::permanent(e.to_string())
    }
}

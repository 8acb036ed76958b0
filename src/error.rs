//! Error types for the Superface SDK
//!
//! A single taxonomy roots every failure the SDK can produce. Each variant
//! carries an [`ErrorReport`]: a short message, optional multi-line details,
//! hint lines, and a prefix chain that outer layers (the failure policies,
//! the failover router) prepend for diagnostics.

use std::fmt;

use thiserror::Error;

use crate::values::Variable;

/// Result type alias for the Superface SDK
pub type Result<T> = std::result::Result<T, SdkError>;

/// Structured diagnostic attached to every SDK error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    /// One-line summary
    short: String,
    /// Longer explanation, one line per entry
    details: Vec<String>,
    /// Actionable hints rendered as `Hint: ...`
    hints: Vec<String>,
    /// Prefix chain, outermost first
    prefixes: Vec<String>,
}

impl ErrorReport {
    /// Create a report with just a short message.
    pub fn new(short: impl Into<String>) -> Self {
        Self {
            short: short.into(),
            ..Self::default()
        }
    }

    /// Append a detail line.
    #[must_use]
    pub fn detail(mut self, line: impl Into<String>) -> Self {
        self.details.push(line.into());
        self
    }

    /// Append a hint line.
    #[must_use]
    pub fn hint(mut self, line: impl Into<String>) -> Self {
        self.hints.push(line.into());
        self
    }

    /// Prepend a prefix to the rendered message, outermost first.
    ///
    /// Policies and the router thread their abort reasons through this
    /// chain, so `No backup provider available: Max (3) retries exceeded:
    /// original failure` reads outside-in.
    pub fn add_prefix_message(&mut self, prefix: impl Into<String>) {
        self.prefixes.insert(0, prefix.into());
    }

    /// The prefix chain joined with the short message.
    pub fn short_message(&self) -> String {
        if self.prefixes.is_empty() {
            self.short.clone()
        } else {
            format!("{}: {}", self.prefixes.join(": "), self.short)
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_message())?;
        for line in &self.details {
            write!(f, "\n{line}")?;
        }
        for hint in &self.hints {
            write!(f, "\nHint: {hint}")?;
        }
        Ok(())
    }
}

/// Failure kinds surfaced by the HTTP client for errors below the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The request hit its per-request timeout
    Timeout,
    /// DNS resolution failed
    Dns,
    /// The connection was refused
    Reject,
    /// TLS certificate could not be verified
    UnsignedSsl,
}

impl NetworkErrorKind {
    /// Lowercase label used in messages and metric payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Reject => "reject",
            Self::UnsignedSsl => "unsigned-ssl",
        }
    }
}

/// Failure kinds for request construction and teardown problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// The request was aborted before a response arrived
    Abort,
    /// The request timed out while being issued
    Timeout,
}

impl RequestErrorKind {
    /// Lowercase label used in messages and metric payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Timeout => "timeout",
        }
    }
}

/// Superface SDK errors
#[derive(Error, Debug)]
pub enum SdkError {
    /// Bind failure reported by the registry or local resolution
    #[error("{0}")]
    Bind(ErrorReport),

    /// Registry bind failed without a parseable problem body
    #[error("{0}")]
    UnknownBind(ErrorReport),

    /// The map AST was malformed or referenced unknown nodes
    #[error("{0}")]
    MapAst(ErrorReport),

    /// An embedded expression failed to evaluate
    #[error("{report}\nExpression: {expression}")]
    Jessie {
        /// Diagnostic report
        report: ErrorReport,
        /// Source text of the failed expression
        expression: String,
    },

    /// HTTP response with status >= 400 that no response handler matched
    #[error("{report}")]
    Http {
        /// Response status code
        status_code: u16,
        /// Diagnostic report
        report: ErrorReport,
    },

    /// Map error outcome raised while handling an HTTP response
    #[error("HTTP call failed with status {status_code}: mapped error")]
    MappedHttp {
        /// Response status code of the handled response
        status_code: u16,
        /// Error value produced by the map
        error: Variable,
    },

    /// Map error outcome (`map error` / `fail`) surfaced by the use case
    #[error("Use case error: {}", serde_json::Value::from(error.clone()))]
    Mapped {
        /// Error value produced by the map
        error: Variable,
    },

    /// Input failed structural validation against the profile
    #[error("{0}")]
    InputValidation(ErrorReport),

    /// Result failed structural validation against the profile
    #[error("{0}")]
    ResultValidation(ErrorReport),

    /// Network-level fetch failure
    #[error("Network fetch failed: {}", kind.as_str())]
    NetworkFetch {
        /// What went wrong below the HTTP layer
        kind: NetworkErrorKind,
    },

    /// Request-level fetch failure
    #[error("Request fetch failed: {}", kind.as_str())]
    RequestFetch {
        /// What went wrong issuing the request
        kind: RequestErrorKind,
    },

    /// Programmer error; never expected in normal operation
    #[error("{0}")]
    Unexpected(ErrorReport),
}

impl SdkError {
    /// Create a bind error with a short message.
    pub fn bind(short: impl Into<String>) -> Self {
        Self::Bind(ErrorReport::new(short))
    }

    /// Create an unexpected error with a short message.
    pub fn unexpected(short: impl Into<String>) -> Self {
        Self::Unexpected(ErrorReport::new(short))
    }

    /// Create a map-AST error with a short message.
    pub fn map_ast(short: impl Into<String>) -> Self {
        Self::MapAst(ErrorReport::new(short))
    }

    /// True when this failure happened during bind rather than perform.
    pub fn is_bind_error(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::UnknownBind(_))
    }

    /// Prepend a prefix to the error's report, when it carries one.
    pub fn add_prefix_message(&mut self, prefix: impl Into<String>) {
        match self {
            Self::Bind(report)
            | Self::UnknownBind(report)
            | Self::MapAst(report)
            | Self::Jessie { report, .. }
            | Self::Http { report, .. }
            | Self::InputValidation(report)
            | Self::ResultValidation(report)
            | Self::Unexpected(report) => report.add_prefix_message(prefix),
            Self::MappedHttp { .. }
            | Self::Mapped { .. }
            | Self::NetworkFetch { .. }
            | Self::RequestFetch { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_renders_details_and_hints() {
        let report = ErrorReport::new("Service not found: api")
            .detail("Provider defines services: default, backup")
            .hint("Check the provider definition");

        let rendered = report.to_string();

        assert!(rendered.starts_with("Service not found: api\n"));
        assert!(rendered.contains("Provider defines services"));
        assert!(rendered.ends_with("Hint: Check the provider definition"));
    }

    #[test]
    fn prefixes_render_outermost_first() {
        let mut report = ErrorReport::new("original failure");
        report.add_prefix_message("Max (3) retries exceeded");
        report.add_prefix_message("No backup provider available");

        assert_eq!(
            report.short_message(),
            "No backup provider available: Max (3) retries exceeded: original failure"
        );
    }

    #[test]
    fn bind_classification_covers_both_bind_variants() {
        assert!(SdkError::bind("x").is_bind_error());
        assert!(SdkError::UnknownBind(ErrorReport::new("x")).is_bind_error());
        assert!(!SdkError::unexpected("x").is_bind_error());
    }

    #[test]
    fn prefix_on_error_flows_into_display() {
        let mut error = SdkError::bind("provider rejected");
        error.add_prefix_message("No backup provider available");

        assert!(
            error
                .to_string()
                .starts_with("No backup provider available: provider rejected")
        );
    }
}

//! Error types for log retrieval.

use std::io;

use thiserror::Error;

/// Errors that can occur while retrieving logs from Loki.
#[derive(Debug, Error)]
pub enum LokiError {
    /// The connection parameters are invalid (blank URL, zero page size, ...).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A collaborator required at construction time was not supplied.
    #[error("invalid configuration: missing collaborator `{0}`")]
    MissingCollaborator(&'static str),

    /// The backend could not be reached (DNS, connect, TLS handshake, timeout).
    #[error("Loki unreachable ({request}): {message}")]
    BackendUnreachable {
        /// Description of the request that failed.
        request: String,
        /// Transport error detail.
        message: String,
    },

    /// The backend answered with a non-success HTTP status.
    #[error("Loki query failed ({request}): HTTP {status}: {body}")]
    BackendQueryFailed {
        /// Description of the request that failed.
        request: String,
        /// HTTP status code.
        status: u16,
        /// Response body, as returned by the backend.
        body: String,
    },

    /// The backend response could not be decoded.
    #[error("unexpected Loki response: {0}")]
    Decode(String),

    /// The visualization URL could not be rendered.
    #[error("template error: {0}")]
    Template(String),

    /// The retriever (or its HTTP client) was already closed.
    #[error("log retriever closed")]
    Closed,

    /// The stream was closed by its consumer while the operation was pending.
    #[error("log stream cancelled")]
    Cancelled,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LokiError {
    /// Returns true for errors raised while validating construction parameters.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::MissingCollaborator(_))
    }

    /// Returns true for failures talking to the backend.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable { .. } | Self::BackendQueryFailed { .. } | Self::Decode(_)
        )
    }

    /// HTTP status carried by a [`LokiError::BackendQueryFailed`].
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::BackendQueryFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Recovers a crate error that crossed an [`io::Read`] boundary.
    ///
    /// Errors that did not originate in this crate are wrapped in [`LokiError::Io`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(loki) = inner.downcast::<Self>() {
                    return *loki;
                }
            }
            return Self::Decode("unrecoverable stream error".to_string());
        }
        Self::Io(err)
    }
}

impl From<LokiError> for io::Error {
    fn from(err: LokiError) -> Self {
        match err {
            LokiError::Io(inner) => inner,
            LokiError::Closed | LokiError::Cancelled => {
                Self::new(io::ErrorKind::ConnectionAborted, err)
            }
            other => Self::other(other),
        }
    }
}

/// Result type alias for log retrieval operations.
pub type Result<T> = std::result::Result<T, LokiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = LokiError::Configuration("Loki url cannot be blank".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: Loki url cannot be blank"
        );

        let err = LokiError::MissingCollaborator("tracer");
        assert_eq!(
            err.to_string(),
            "invalid configuration: missing collaborator `tracer`"
        );

        let err = LokiError::Closed;
        assert_eq!(err.to_string(), "log retriever closed");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LokiError>();
    }

    #[test]
    fn query_failed_carries_status_and_body() {
        let err = LokiError::BackendQueryFailed {
            request: "GET http://loki/loki/api/v1/query_range".to_string(),
            status: 500,
            body: "too many outstanding requests".to_string(),
        };
        assert_eq!(err.status(), Some(500));
        assert!(err.is_backend());
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("too many outstanding requests"));
        assert!(msg.contains("query_range"));
    }

    #[test]
    fn unreachable_includes_request() {
        let err = LokiError::BackendUnreachable {
            request: "GET http://127.0.0.1:1/loki/api/v1/format_query".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_backend());
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn configuration_grouping() {
        assert!(LokiError::Configuration("x".to_string()).is_configuration());
        assert!(LokiError::MissingCollaborator("template").is_configuration());
        assert!(!LokiError::Closed.is_configuration());
        assert!(!LokiError::Template("x".to_string()).is_backend());
    }

    // =========================================================================
    // io::Error round trips
    // =========================================================================

    #[test]
    fn io_boundary_preserves_crate_error() {
        let io_err: io::Error = LokiError::BackendQueryFailed {
            request: "GET x".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::Other);

        let back = LokiError::from_io(io_err);
        assert_eq!(back.status(), Some(502));
    }

    #[test]
    fn io_boundary_closed_is_connection_aborted() {
        let io_err: io::Error = LokiError::Cancelled.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(matches!(LokiError::from_io(io_err), LokiError::Cancelled));
    }

    #[test]
    fn foreign_io_error_is_wrapped() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err = LokiError::from_io(io_err);
        assert!(matches!(err, LokiError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn error_debug_format_all_variants() {
        let errors = vec![
            LokiError::Configuration("test".to_string()),
            LokiError::MissingCollaborator("tracer"),
            LokiError::Decode("test".to_string()),
            LokiError::Template("test".to_string()),
            LokiError::Closed,
            LokiError::Cancelled,
        ];

        for err in errors {
            let debug = format!("{err:?}");
            assert!(!debug.is_empty());
        }
    }
}

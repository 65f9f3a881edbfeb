//! # buildlog-loki
//!
//! Read path for pipeline build logs shipped to Loki.
//!
//! This crate provides:
//!
//! - [`LokiLogRetriever`] — Overall and per-step logs of a run, plus a connectivity check
//! - [`LokiClient`] — Label-scoped `query_range` requests against the Loki HTTP API
//! - [`LogLineIterator`] — Ordered, deduplicated lines across overlapping query windows,
//!   polling running executions
//! - [`LineStream`] — [`std::io::Read`] adapter with byte offset to line tracking
//! - [`LogByteBuffer`] — In-memory, randomly addressable view of a stream
//! - [`Tracer`] — Span seam; [`TracingTracer`] maps spans onto `tracing`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! use buildlog_loki::{
//!     BackendBindings, LogRequest, LokiConfig, LokiLogRetriever, PlaceholderTemplate,
//!     TracingTracer,
//! };
//! use chrono::Utc;
//!
//! # fn main() -> buildlog_loki::Result<()> {
//! let retriever = LokiLogRetriever::builder()
//!     .config(LokiConfig::new("http://localhost:3100").with_tenant_id("ci"))
//!     .tracer(Arc::new(TracingTracer))
//!     .template(Arc::new(PlaceholderTemplate::new(
//!         "https://grafana.example.com/explore?traceId=${traceId}",
//!     )))
//!     .bindings_provider(Arc::new(BackendBindings::new("Loki", "/images/loki.svg")))
//!     .build()?;
//!
//! let request = LogRequest::new("folder/my-pipeline", 42, "4bf92f35", "00f067aa", Utc::now());
//! let mut result = retriever.overall_log(&request)?;
//! let mut text = String::new();
//! result.stream.read_to_string(&mut text)?;
//! println!("{}: {}", result.header.backend_name, result.header.visualization_url);
//! retriever.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cancel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod iterator;
pub mod logql;
pub mod offsets;
pub mod retriever;
pub mod stream;
pub mod telemetry;
pub mod template;
pub mod traits;
pub mod types;

// Re-export main types
pub use cancel::Cancellation;
pub use client::LokiClient;
pub use config::{Credentials, LokiConfig, TailPolicy, TlsVerification};
pub use connection::ConnectionProfile;
pub use error::{LokiError, Result};
pub use iterator::{system_clock, Clock, IteratorState, LogLineIterator};
pub use logql::LogQl;
pub use offsets::LineOffsetMap;
pub use retriever::{
    LogRequest, LogsViewHeader, LokiLogRetriever, LokiLogRetrieverBuilder, RetrievalResult,
};
pub use stream::{LineStream, LogByteBuffer};
pub use telemetry::{ActiveSpan, AttributeValue, NoopTracer, SpanGuard, SpanStatus, Tracer, TracingTracer};
pub use template::{
    BackendBindings, LocalBindings, PlaceholderTemplate, TemplateBindings,
    TemplateBindingsProvider, UrlTemplate,
};
pub use traits::{LogQuery, QueryBatch};
pub use types::{Fingerprint, LogEntry, QueryScope, Severity, TimeWindow, Validation};

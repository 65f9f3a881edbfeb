//! Span instrumentation seam.
//!
//! The host owns the tracing backend; this crate only opens spans and records
//! attributes through the [`Tracer`] it is handed at construction time.
//! [`TracingTracer`] maps spans onto the `tracing` crate.

use std::fmt;

use tracing::field::Empty;

/// Span attribute keys.
pub mod attributes {
    /// Full name of the pipeline.
    pub const PIPELINE_ID: &str = "ci.pipeline.id";
    /// Run (build) number.
    pub const RUN_NUMBER: &str = "ci.pipeline.run.number";
    /// Step (flow node) id.
    pub const STEP_ID: &str = "jenkins.pipeline.step.id";
    /// Whether the execution has finished.
    pub const COMPLETE: &str = "complete";
    /// LogQL query sent to the backend.
    pub const QUERY: &str = "loki.query";
    /// Query window start, nanoseconds.
    pub const WINDOW_START: &str = "loki.window.start";
    /// Query window end, nanoseconds.
    pub const WINDOW_END: &str = "loki.window.end";
    /// Number of entries returned or emitted.
    pub const ENTRIES: &str = "loki.entries";
    /// Bytes requested by a read.
    pub const BYTES_REQUESTED: &str = "bytes.requested";
    /// Bytes produced by a read.
    pub const BYTES_READ: &str = "bytes.read";
}

/// Value of a span attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    /// Completed normally.
    Ok,
    /// Failed, with a description.
    Error(String),
}

/// An open span.
pub trait ActiveSpan: Send {
    /// Sets (or overwrites) an attribute.
    fn set_attribute(&mut self, key: &'static str, value: AttributeValue);

    /// Attaches an error to the span.
    fn record_error(&mut self, error: &(dyn std::error::Error + 'static));

    /// Sets the span status.
    fn set_status(&mut self, status: SpanStatus);

    /// Ends the span.
    fn end(self: Box<Self>);
}

/// Opens spans.
pub trait Tracer: Send + Sync {
    /// Starts a span with initial attributes.
    fn start_span(
        &self,
        name: &'static str,
        attributes: Vec<(&'static str, AttributeValue)>,
    ) -> Box<dyn ActiveSpan>;
}

/// Scoped span: ends the wrapped span when dropped.
pub struct SpanGuard {
    span: Option<Box<dyn ActiveSpan>>,
}

impl SpanGuard {
    /// Starts a span through `tracer`.
    #[must_use]
    pub fn start(
        tracer: &dyn Tracer,
        name: &'static str,
        attributes: Vec<(&'static str, AttributeValue)>,
    ) -> Self {
        Self {
            span: Some(tracer.start_span(name, attributes)),
        }
    }

    /// Sets an attribute on the open span.
    pub fn set_attribute(&mut self, key: &'static str, value: impl Into<AttributeValue>) {
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(key, value.into());
        }
    }

    /// Records `error` and marks the span as failed.
    pub fn fail(&mut self, error: &(dyn std::error::Error + 'static)) {
        if let Some(span) = self.span.as_mut() {
            span.record_error(error);
            span.set_status(SpanStatus::Error(error.to_string()));
        }
    }

    /// Records the outcome of `result` on the span and passes it through.
    pub fn observe<T, E>(&mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: std::error::Error + 'static,
    {
        if let Err(err) = &result {
            self.fail(err);
        }
        result
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            span.end();
        }
    }
}

/// [`Tracer`] backed by `tracing` spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(
        &self,
        name: &'static str,
        attributes: Vec<(&'static str, AttributeValue)>,
    ) -> Box<dyn ActiveSpan> {
        let span = tracing::info_span!(
            target: "buildlog_loki",
            "loki",
            otel.name = name,
            otel.status_code = Empty,
            otel.status_message = Empty,
            error = Empty,
            ci.pipeline.id = Empty,
            ci.pipeline.run.number = Empty,
            jenkins.pipeline.step.id = Empty,
            complete = Empty,
            loki.query = Empty,
            loki.window.start = Empty,
            loki.window.end = Empty,
            loki.entries = Empty,
            bytes.requested = Empty,
            bytes.read = Empty,
        );
        let mut active = TracingSpan { span };
        for (key, value) in attributes {
            active.set_attribute(key, value);
        }
        Box::new(active)
    }
}

struct TracingSpan {
    span: tracing::Span,
}

impl ActiveSpan for TracingSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttributeValue) {
        match value {
            AttributeValue::Str(s) => self.span.record(key, s.as_str()),
            AttributeValue::Int(i) => self.span.record(key, i),
            AttributeValue::Bool(b) => self.span.record(key, b),
        };
    }

    fn record_error(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.span.record("error", tracing::field::display(error));
        tracing::warn!(parent: &self.span, error = %error, "span failed");
    }

    fn set_status(&mut self, status: SpanStatus) {
        match status {
            SpanStatus::Ok => {
                self.span.record("otel.status_code", "OK");
            }
            SpanStatus::Error(message) => {
                self.span.record("otel.status_code", "ERROR");
                self.span.record("otel.status_message", message.as_str());
            }
        }
    }

    fn end(self: Box<Self>) {
        drop(self.span);
    }
}

/// [`Tracer`] that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl ActiveSpan for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: AttributeValue) {}
    fn record_error(&mut self, _error: &(dyn std::error::Error + 'static)) {}
    fn set_status(&mut self, _status: SpanStatus) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(
        &self,
        _name: &'static str,
        _attributes: Vec<(&'static str, AttributeValue)>,
    ) -> Box<dyn ActiveSpan> {
        Box::new(NoopSpan)
    }
}

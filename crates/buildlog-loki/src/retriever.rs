//! Log retrieval entry point.
//!
//! [`LokiLogRetriever`] assembles, per call, the chain
//! [`LokiClient`] → [`LogLineIterator`] → [`LineStream`] and packages the
//! stream with the visualization header.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::client::LokiClient;
use crate::config::LokiConfig;
use crate::connection::ConnectionProfile;
use crate::error::{LokiError, Result};
use crate::iterator::{system_clock, Clock, LogLineIterator};
use crate::stream::{LineStream, LogByteBuffer};
use crate::telemetry::{attributes, AttributeValue, SpanGuard, Tracer};
use crate::template::{LocalBindings, TemplateBindings, TemplateBindingsProvider, UrlTemplate};
use crate::traits::LogQuery;
use crate::types::{QueryScope, Validation};

/// Character encoding of every returned stream.
pub const ENCODING: &str = "UTF-8";

/// Identifies the run whose logs are requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    /// Full name of the pipeline.
    pub pipeline_id: String,
    /// Build number.
    pub run_number: u64,
    /// Trace id of the run.
    pub trace_id: String,
    /// Span id of the run (or of the step for step logs).
    pub span_id: String,
    /// Whether the execution has finished.
    pub complete: bool,
    /// Start of the run.
    pub start_time: DateTime<Utc>,
    /// End of the run; `None` while running.
    pub end_time: Option<DateTime<Utc>>,
}

impl LogRequest {
    /// Creates a request for a running execution.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        run_number: u64,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            run_number,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            complete: false,
            start_time,
            end_time: None,
        }
    }

    /// Sets the end time.
    #[must_use]
    pub const fn with_end_time(mut self, end_time: Option<DateTime<Utc>>) -> Self {
        self.end_time = end_time;
        self
    }

    /// Marks the execution as finished (or not).
    #[must_use]
    pub const fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    fn scope(&self, step_id: Option<&str>) -> QueryScope {
        let scope = QueryScope::run(
            self.pipeline_id.clone(),
            self.run_number,
            self.trace_id.clone(),
            self.start_time,
        )
        .with_end_time(self.end_time)
        .with_complete(self.complete);
        match step_id {
            Some(step) => scope.with_step(step),
            None => scope,
        }
    }
}

/// Header shown above a log view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsViewHeader {
    /// Display name of the backend.
    pub backend_name: String,
    /// Deep link into the visualization dashboard.
    pub visualization_url: String,
    /// Icon of the backend.
    pub icon_url: String,
}

/// Outcome of a retrieval call.
///
/// The caller owns the stream; dropping it cancels pending backend polls.
#[derive(Debug)]
pub struct RetrievalResult {
    /// Lines of the run, newline separated.
    pub stream: LineStream,
    /// Header of the log view.
    pub header: LogsViewHeader,
    /// Character encoding of the stream.
    pub encoding: &'static str,
    /// Echo of the request's completion flag.
    pub complete: bool,
}

impl RetrievalResult {
    /// Wraps the stream into a randomly addressable buffer.
    #[must_use]
    pub fn into_buffer(self) -> LogByteBuffer {
        LogByteBuffer::new(self.stream)
    }
}

/// Builder for [`LokiLogRetriever`].
///
/// Every collaborator is mandatory.
#[derive(Default)]
pub struct LokiLogRetrieverBuilder {
    config: Option<LokiConfig>,
    tracer: Option<Arc<dyn Tracer>>,
    template: Option<Arc<dyn UrlTemplate>>,
    bindings: Option<Arc<dyn TemplateBindingsProvider>>,
    clock: Option<Clock>,
}

impl LokiLogRetrieverBuilder {
    /// Sets the connection configuration.
    #[must_use]
    pub fn config(mut self, config: LokiConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the tracer spans are opened with.
    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Sets the visualization URL template.
    #[must_use]
    pub fn template(mut self, template: Arc<dyn UrlTemplate>) -> Self {
        self.template = Some(template);
        self
    }

    /// Sets the host binding provider.
    #[must_use]
    pub fn bindings_provider(mut self, bindings: Arc<dyn TemplateBindingsProvider>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Overrides the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the retriever.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::MissingCollaborator`] when a collaborator is
    /// missing and [`LokiError::Configuration`] for an invalid configuration.
    /// Both are detected before the HTTP client is created.
    pub fn build(self) -> Result<LokiLogRetriever> {
        let config = self.config.ok_or(LokiError::MissingCollaborator("config"))?;
        let tracer = self.tracer.ok_or(LokiError::MissingCollaborator("tracer"))?;
        let template = self.template.ok_or(LokiError::MissingCollaborator("template"))?;
        let bindings = self
            .bindings
            .ok_or(LokiError::MissingCollaborator("bindings_provider"))?;
        config.validate()?;

        let connection = Arc::new(ConnectionProfile::new(&config)?);
        let client = Arc::new(LokiClient::new(
            Arc::clone(&connection),
            &config,
            Arc::clone(&tracer),
        ));
        info!(
            url = %connection.base_url(),
            service_name = %config.service_name,
            "Loki log retriever ready"
        );

        Ok(LokiLogRetriever {
            config,
            connection,
            client,
            tracer,
            template,
            bindings,
            clock: self.clock.unwrap_or_else(system_clock),
        })
    }
}

/// Retrieves pipeline logs stored in Loki.
///
/// Safe to share between threads; each call builds its own iterator. After
/// [`LokiLogRetriever::close`] every call fails with [`LokiError::Closed`].
pub struct LokiLogRetriever {
    config: LokiConfig,
    connection: Arc<ConnectionProfile>,
    client: Arc<LokiClient>,
    tracer: Arc<dyn Tracer>,
    template: Arc<dyn UrlTemplate>,
    bindings: Arc<dyn TemplateBindingsProvider>,
    clock: Clock,
}

impl LokiLogRetriever {
    /// Starts building a retriever.
    #[must_use]
    pub fn builder() -> LokiLogRetrieverBuilder {
        LokiLogRetrieverBuilder::default()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LokiConfig {
        &self.config
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Logs of a whole run.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Closed`] after [`close`](Self::close), a backend
    /// error if the first query fails and [`LokiError::Template`] if the
    /// visualization URL cannot be rendered.
    pub fn overall_log(&self, request: &LogRequest) -> Result<RetrievalResult> {
        let span = SpanGuard::start(
            self.tracer.as_ref(),
            "LokiLogRetriever.overallLog",
            vec![
                (attributes::PIPELINE_ID, request.pipeline_id.clone().into()),
                (attributes::RUN_NUMBER, request.run_number.into()),
                (attributes::COMPLETE, request.complete.into()),
            ],
        );
        self.retrieve(span, request, None)
    }

    /// Logs of one step of a run.
    ///
    /// # Errors
    ///
    /// Same as [`overall_log`](Self::overall_log).
    pub fn step_log(&self, request: &LogRequest, step_id: &str) -> Result<RetrievalResult> {
        let span = SpanGuard::start(
            self.tracer.as_ref(),
            "LokiLogRetriever.stepLog",
            vec![
                (attributes::PIPELINE_ID, request.pipeline_id.clone().into()),
                (attributes::RUN_NUMBER, request.run_number.into()),
                (attributes::STEP_ID, AttributeValue::from(step_id)),
                (attributes::COMPLETE, request.complete.into()),
            ],
        );
        self.retrieve(span, request, Some(step_id))
    }

    fn retrieve(
        &self,
        mut span: SpanGuard,
        request: &LogRequest,
        step_id: Option<&str>,
    ) -> Result<RetrievalResult> {
        let result = self.assemble(request, step_id);
        span.observe(result)
    }

    fn assemble(&self, request: &LogRequest, step_id: Option<&str>) -> Result<RetrievalResult> {
        if self.is_closed() {
            return Err(LokiError::Closed);
        }
        let scope = request.scope(step_id);
        debug!(
            pipeline_id = %scope.pipeline_id,
            run_number = scope.run_number,
            step_id = ?scope.step_id,
            complete = scope.complete,
            "retrieving logs"
        );

        let backend: Arc<dyn LogQuery> = self.client.clone();
        let mut lines = LogLineIterator::new(
            backend,
            scope,
            self.config.page_limit,
            self.config.tail.clone(),
            Arc::clone(&self.tracer),
        )
        .with_clock(Arc::clone(&self.clock));
        lines.prime()?;

        let bindings = TemplateBindings {
            local: LocalBindings {
                trace_id: request.trace_id.clone(),
                span_id: request.span_id.clone(),
                start_time: request.start_time,
                end_time: request.end_time.unwrap_or_else(|| (self.clock)()),
            },
            backend: self.bindings.bindings(),
        };
        let visualization_url = self.template.render(&bindings.to_map())?;

        Ok(RetrievalResult {
            stream: LineStream::new(lines, Arc::clone(&self.tracer)),
            header: LogsViewHeader {
                backend_name: bindings.backend.backend_name,
                visualization_url,
                icon_url: bindings.backend.backend_icon_url,
            },
            encoding: ENCODING,
            complete: request.complete,
        })
    }

    /// Checks connectivity and credentials; never fails.
    #[must_use]
    pub fn check_setup(&self) -> Vec<Validation> {
        vec![self.client.check()]
    }

    /// Closes the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Closed`] if already closed.
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }
}

impl fmt::Debug for LokiLogRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LokiLogRetriever")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

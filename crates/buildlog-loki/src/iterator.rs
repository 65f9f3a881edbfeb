//! Ordered, deduplicated iteration over the lines of a pipeline run.
//!
//! [`LogLineIterator`] drives a [`LogQuery`] backend across successive time
//! windows. The backend does not guarantee non-overlapping pages, so every
//! window restarts at the newest timestamp already seen and the overlap is
//! removed by fingerprint. For a running execution an empty answer is not the
//! end: the iterator sleeps (bounded exponential backoff) and polls again.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::config::TailPolicy;
use crate::error::Result;
use crate::telemetry::{attributes, SpanGuard, Tracer};
use crate::traits::{LogQuery, QueryBatch};
use crate::types::{to_nanos, Fingerprint, LogEntry, QueryScope, TimeWindow};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// [`Clock`] reading the system time.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// State of a [`LogLineIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Nothing fetched yet.
    Idle,
    /// Entries are queued.
    Buffered,
    /// Polling a running execution for new lines.
    Waiting,
    /// No more entries (terminal).
    Exhausted,
    /// Closed by the consumer (terminal).
    Cancelled,
}

impl IteratorState {
    /// Returns true for states that never yield again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Cancelled)
    }
}

/// Outcome of one fetch.
enum Step {
    Buffered,
    Again,
    Exhausted,
}

/// Position of the iteration; only ever touched by the iterator.
#[derive(Debug)]
struct Cursor {
    /// Start (inclusive) of the next window.
    next_start: DateTime<Utc>,
    /// Newest timestamp handed to the buffer.
    last_emitted: Option<DateTime<Utc>>,
    /// Fingerprints already handed out, with their timestamp for pruning.
    seen: HashMap<Fingerprint, DateTime<Utc>>,
    /// Sequence assigned to the next emitted entry.
    next_sequence: u64,
    /// Consecutive empty polls.
    idle_polls: u32,
    /// When the current idle streak began.
    idle_since: Option<Instant>,
}

impl Cursor {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            next_start: start,
            last_emitted: None,
            seen: HashMap::new(),
            next_sequence: 0,
            idle_polls: 0,
            idle_since: None,
        }
    }

    /// Filters a batch down to entries never emitted, in emission order.
    fn admit(&mut self, scope: &QueryScope, mut entries: Vec<LogEntry>) -> Vec<LogEntry> {
        entries.sort_by_key(LogEntry::order_key);

        let mut fresh = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if entry.timestamp < scope.start_time
                || scope.end_time.is_some_and(|end| entry.timestamp >= end)
            {
                continue;
            }
            let fingerprint = entry.fingerprint();
            if self.seen.contains_key(&fingerprint) {
                continue;
            }
            if self.last_emitted.is_some_and(|last| entry.timestamp < last) {
                warn!(
                    timestamp = %entry.timestamp,
                    fingerprint = %fingerprint,
                    "dropping late log entry older than lines already emitted"
                );
                continue;
            }
            self.seen.insert(fingerprint, entry.timestamp);
            entry.sequence = self.next_sequence;
            self.next_sequence += 1;
            self.last_emitted = Some(entry.timestamp);
            fresh.push(entry);
        }
        fresh
    }

    /// Moves the window start after a fetch.
    fn advance(&mut self, batch_next_start: Option<DateTime<Utc>>, fresh: bool) {
        match batch_next_start {
            Some(next) if next > self.next_start => self.next_start = next,
            Some(_) if !fresh => {
                warn!(
                    start = %self.next_start,
                    "page filled with a single timestamp, skipping ahead one nanosecond"
                );
                self.next_start += ChronoDuration::nanoseconds(1);
            }
            Some(_) => {}
            None => {
                if let Some(last) = self.last_emitted {
                    self.next_start = self.next_start.max(last);
                }
            }
        }
        let floor = self.next_start;
        self.seen.retain(|_, timestamp| *timestamp >= floor);
    }

    fn reset_idle(&mut self) {
        self.idle_polls = 0;
        self.idle_since = None;
    }
}

/// Pull-based iterator over the log entries of one [`QueryScope`].
///
/// Yields `Result<LogEntry>`; after an error or once exhausted or cancelled
/// it only yields `None`. Entries come out in strictly increasing
/// (timestamp, sequence) order and each fingerprint at most once.
pub struct LogLineIterator {
    backend: Arc<dyn LogQuery>,
    scope: QueryScope,
    page_limit: usize,
    policy: TailPolicy,
    tracer: Arc<dyn Tracer>,
    cancellation: Cancellation,
    clock: Clock,
    cursor: Cursor,
    buffer: VecDeque<LogEntry>,
    state: IteratorState,
    queries: u64,
}

impl LogLineIterator {
    /// Creates an iterator over `scope`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn LogQuery>,
        scope: QueryScope,
        page_limit: usize,
        policy: TailPolicy,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        let cursor = Cursor::new(scope.start_time);
        Self {
            backend,
            scope,
            page_limit: page_limit.max(1),
            policy,
            tracer,
            cancellation: Cancellation::new(),
            clock: system_clock(),
            cursor,
            buffer: VecDeque::new(),
            state: IteratorState::Idle,
            queries: 0,
        }
    }

    /// Uses an externally owned cancellation handle.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Replaces the clock deciding how far an open window reaches.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> IteratorState {
        self.state
    }

    /// Scope being iterated.
    #[must_use]
    pub const fn scope(&self) -> &QueryScope {
        &self.scope
    }

    /// Returns true when the next pull is answered without a backend query.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Number of backend queries issued so far.
    #[must_use]
    pub const fn queries(&self) -> u64 {
        self.queries
    }

    /// Handle cancelling this iterator from another thread.
    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Stops the iteration; no further queries are issued.
    pub fn close(&mut self) {
        self.cancellation.cancel();
        self.buffer.clear();
        self.state = IteratorState::Cancelled;
    }

    /// End of the next window and whether it reaches the scope's end time.
    fn window_end(&self) -> (DateTime<Utc>, bool) {
        let now = (self.clock)();
        match self.scope.end_time {
            Some(end) if self.scope.complete => (end, true),
            Some(end) => (end.min(now), now >= end),
            None => (now, false),
        }
    }

    /// Issues the first backend query without waiting for new lines.
    ///
    /// Surfaces a failing backend before any byte is read; a no-op once the
    /// iteration started.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the iterator is then exhausted.
    pub fn prime(&mut self) -> Result<()> {
        if self.state != IteratorState::Idle || self.cancellation.is_cancelled() {
            return Ok(());
        }
        match self.fetch(false) {
            Ok(Step::Exhausted) => {
                self.state = IteratorState::Exhausted;
                Ok(())
            }
            Ok(Step::Buffered | Step::Again) => Ok(()),
            Err(err) => {
                self.state = IteratorState::Exhausted;
                Err(err)
            }
        }
    }

    fn fetch(&mut self, wait: bool) -> Result<Step> {
        let (window_end, reaches_end) = self.window_end();
        let window = TimeWindow::new(self.cursor.next_start, window_end);

        let batch = if window.is_empty() {
            QueryBatch::default()
        } else {
            self.queries += 1;
            let mut span = SpanGuard::start(
                self.tracer.as_ref(),
                "LogLineIterator.fetch",
                vec![
                    (attributes::PIPELINE_ID, self.scope.pipeline_id.clone().into()),
                    (attributes::RUN_NUMBER, self.scope.run_number.into()),
                    (attributes::WINDOW_START, to_nanos(window.start).into()),
                    (attributes::WINDOW_END, to_nanos(window.end).into()),
                ],
            );
            let result = span.observe(self.backend.query_range(&self.scope, window, self.page_limit));
            if let Ok(batch) = &result {
                span.set_attribute(attributes::ENTRIES, batch.entries.len());
            }
            result?
        };

        let truncated = batch.is_truncated();
        let next_start = batch.next_start;
        let fresh = self.cursor.admit(&self.scope, batch.entries);
        self.cursor.advance(next_start, !fresh.is_empty());

        debug!(
            pipeline_id = %self.scope.pipeline_id,
            run_number = self.scope.run_number,
            fresh = fresh.len(),
            truncated,
            next_start = %self.cursor.next_start,
            "fetched log window"
        );

        if !fresh.is_empty() {
            self.buffer.extend(fresh);
            self.cursor.reset_idle();
            self.state = IteratorState::Buffered;
            return Ok(Step::Buffered);
        }
        if truncated {
            return Ok(Step::Again);
        }
        if self.scope.complete || reaches_end {
            return Ok(Step::Exhausted);
        }
        if !wait {
            return Ok(Step::Again);
        }
        Ok(self.wait())
    }

    /// Sleeps before polling a running execution again.
    fn wait(&mut self) -> Step {
        self.state = IteratorState::Waiting;
        let idle = self.cursor.idle_since.get_or_insert_with(Instant::now).elapsed();
        if !self.policy.should_poll(idle) {
            info!(
                pipeline_id = %self.scope.pipeline_id,
                run_number = self.scope.run_number,
                idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                "no new log lines, stop tailing"
            );
            return Step::Exhausted;
        }
        self.cursor.idle_polls += 1;
        let delay = self.policy.delay_for_attempt(self.cursor.idle_polls);
        self.cancellation.sleep(delay);
        Step::Again
    }
}

impl Iterator for LogLineIterator {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancellation.is_cancelled() {
                self.buffer.clear();
                self.state = IteratorState::Cancelled;
                return None;
            }
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.state.is_terminal() {
                return None;
            }
            match self.fetch(true) {
                Ok(Step::Buffered | Step::Again) => {}
                Ok(Step::Exhausted) => {
                    self.state = IteratorState::Exhausted;
                    return None;
                }
                Err(err) => {
                    self.state = IteratorState::Exhausted;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl fmt::Debug for LogLineIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogLineIterator")
            .field("scope", &self.scope)
            .field("state", &self.state)
            .field("next_start", &self.cursor.next_start)
            .field("buffered", &self.buffer.len())
            .field("queries", &self.queries)
            .finish_non_exhaustive()
    }
}

//! Traits for log query backends.
//!
//! This module provides the [`LogQuery`] trait abstracting over the remote
//! backend, so the iterator can be driven by the HTTP client or by a fake.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{LogEntry, QueryScope, TimeWindow, Validation};

/// One page of results for a range query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBatch {
    /// Entries inside the requested window, ordered by (timestamp, sequence).
    pub entries: Vec<LogEntry>,
    /// Where to resume (inclusive) when the page was truncated by the limit.
    ///
    /// `None` means the window was fully drained.
    pub next_start: Option<DateTime<Utc>>,
}

impl QueryBatch {
    /// A batch that drained its window.
    #[must_use]
    pub const fn complete(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            next_start: None,
        }
    }

    /// A batch truncated by the page limit.
    #[must_use]
    pub const fn truncated(entries: Vec<LogEntry>, next_start: DateTime<Utc>) -> Self {
        Self {
            entries,
            next_start: Some(next_start),
        }
    }

    /// Returns true when the page limit cut the window short.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.next_start.is_some()
    }

    /// Returns true when no entry was returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Backend able to answer label-scoped range queries.
///
/// Implementations must be safe to call from several threads at once.
pub trait LogQuery: Send + Sync {
    /// Fetches at most `limit` entries of `scope` inside `window`.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the query fails.
    fn query_range(&self, scope: &QueryScope, window: TimeWindow, limit: usize)
        -> Result<QueryBatch>;

    /// Issues a lightweight request to check connectivity and credentials.
    ///
    /// Never fails: problems are reported as an error [`Validation`].
    fn check(&self) -> Validation;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for driving the iterator in tests.

    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{LogQuery, QueryBatch};
    use crate::error::{LokiError, Result};
    use crate::types::{QueryScope, TimeWindow, Validation};

    /// Replays queued responses, then answers with empty drained batches.
    #[derive(Clone, Default)]
    pub struct ScriptedQuery {
        responses: Arc<Mutex<VecDeque<Result<QueryBatch>>>>,
        windows: Arc<Mutex<Vec<TimeWindow>>>,
    }

    impl ScriptedQuery {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, batch: QueryBatch) -> &Self {
            self.responses.lock().push_back(Ok(batch));
            self
        }

        pub fn push_err(&self, err: LokiError) -> &Self {
            self.responses.lock().push_back(Err(err));
            self
        }

        pub fn calls(&self) -> usize {
            self.windows.lock().len()
        }

        pub fn windows(&self) -> Vec<TimeWindow> {
            self.windows.lock().clone()
        }
    }

    impl LogQuery for ScriptedQuery {
        fn query_range(
            &self,
            _scope: &QueryScope,
            window: TimeWindow,
            _limit: usize,
        ) -> Result<QueryBatch> {
            self.windows.lock().push(window);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryBatch::default()))
        }

        fn check(&self) -> Validation {
            Validation::ok("scripted backend")
        }
    }
}

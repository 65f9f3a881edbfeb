//! Core types for log retrieval.
//!
//! This module provides:
//! - [`QueryScope`] — Which pipeline run (and optionally which step) to read
//! - [`LogEntry`] — One line returned by the backend
//! - [`Fingerprint`] — Identity of an entry for deduplication
//! - [`TimeWindow`] — Half-open `[start, end)` time window for one query
//! - [`Validation`] — Outcome of a connectivity self-check

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies the logs of one pipeline run, or of one step of it.
///
/// `end_time` of `None` means open-ended ("tail") mode. `complete` tells the
/// iterator whether the execution has finished, which decides if an empty
/// backend answer ends the iteration or triggers a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryScope {
    /// Full name of the pipeline (job).
    pub pipeline_id: String,
    /// Build number of the run.
    pub run_number: u64,
    /// Step (flow node) identifier, for step logs.
    pub step_id: Option<String>,
    /// Trace identifier of the run.
    pub trace_id: String,
    /// Inclusive start of the time range.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the time range.
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the execution has finished.
    pub complete: bool,
}

impl QueryScope {
    /// Creates a scope covering a whole run.
    #[must_use]
    pub fn run(
        pipeline_id: impl Into<String>,
        run_number: u64,
        trace_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            run_number,
            step_id: None,
            trace_id: trace_id.into(),
            start_time,
            end_time: None,
            complete: false,
        }
    }

    /// Restricts the scope to one step of the run.
    #[must_use]
    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Sets the exclusive end time.
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

    /// Returns true when no end time was given.
    #[must_use]
    pub const fn is_tailing(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new window.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Checks if a timestamp falls within this window.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Returns true when the window covers no instant at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Value identifying one log entry for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One log line returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Origin timestamp, nanosecond resolution.
    pub timestamp: DateTime<Utc>,
    /// Disambiguates entries sharing a timestamp.
    pub sequence: u64,
    /// Raw line bytes.
    pub line: Vec<u8>,
    /// Labels of the stream the line belongs to, plus structured metadata.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl LogEntry {
    /// Creates an entry without labels.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, sequence: u64, line: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            sequence,
            line: line.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Timestamp as nanoseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_nanos(&self) -> i64 {
        to_nanos(self.timestamp)
    }

    /// Ordering key: (timestamp, sequence).
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }

    /// Identity of this entry, independent of its sequence number.
    ///
    /// Two entries with the same timestamp, stream labels and content are the
    /// same entry, even when returned by two overlapping queries.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.timestamp_nanos().hash(&mut hasher);
        self.labels.hash(&mut hasher);
        self.line.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    /// Line content, lossily decoded as UTF-8.
    #[must_use]
    pub fn line_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }
}

/// Severity of a [`Validation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The check passed.
    Ok,
    /// The check failed.
    Error,
}

/// Outcome of one self-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the check passed.
    pub severity: Severity,
    /// Human readable detail.
    pub message: String,
}

impl Validation {
    /// A passed check.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Ok,
            message: message.into(),
        }
    }

    /// A failed check.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// Returns true for a passed check.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.severity, Severity::Ok)
    }

    /// Returns true for a failed check.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

/// Converts a timestamp to nanoseconds since the Unix epoch.
///
/// Instants outside the `i64` nanosecond range (years before 1677 or after
/// 2262) saturate.
#[must_use]
pub fn to_nanos(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_nanos_opt().unwrap_or(if timestamp.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Converts nanoseconds since the Unix epoch to a timestamp.
#[must_use]
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

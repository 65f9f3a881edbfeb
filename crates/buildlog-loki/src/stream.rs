//! Byte stream adaptation of a [`LogLineIterator`].
//!
//! This module provides:
//! - [`LineStream`] — [`std::io::Read`] over the lines of an iterator
//! - [`LogByteBuffer`] — In-memory, randomly addressable view of a stream

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cancel::Cancellation;
use crate::error::LokiError;
use crate::iterator::{IteratorState, LogLineIterator};
use crate::offsets::LineOffsetMap;
use crate::telemetry::{attributes, SpanGuard, Tracer};

const LINE_SEPARATOR: u8 = b'\n';

/// Reads the lines of a [`LogLineIterator`] as newline separated bytes.
///
/// A read of a complete execution fills the whole buffer unless the log ends
/// first. A read of a running execution blocks until at least one byte is
/// available, then keeps filling only while the iterator can answer without
/// querying the backend, so a tailing viewer sees lines as soon as they
/// arrive. A line is recorded in the [`LineOffsetMap`] once its last byte has
/// been handed to the reader.
pub struct LineStream {
    lines: LogLineIterator,
    cancellation: Cancellation,
    tracer: Arc<dyn Tracer>,
    offsets: LineOffsetMap,
    pending: Vec<u8>,
    pending_pos: usize,
    position: u64,
    deferred: Option<LokiError>,
    finished: bool,
    closed: bool,
}

impl LineStream {
    /// Wraps `lines`.
    #[must_use]
    pub fn new(lines: LogLineIterator, tracer: Arc<dyn Tracer>) -> Self {
        let cancellation = lines.cancellation();
        Self {
            lines,
            cancellation,
            tracer,
            offsets: LineOffsetMap::new(),
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
            deferred: None,
            finished: false,
            closed: false,
        }
    }

    /// Line boundaries of the lines fully handed to the reader.
    #[must_use]
    pub const fn offsets(&self) -> &LineOffsetMap {
        &self.offsets
    }

    /// Bytes handed to the reader so far.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// State of the underlying iterator.
    #[must_use]
    pub const fn state(&self) -> IteratorState {
        self.lines.state()
    }

    /// Returns true once closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle cancelling this stream from another thread.
    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Closes the stream and cancels the underlying iterator.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.lines.close();
        self.pending.clear();
        self.pending_pos = 0;
        debug!(
            pipeline_id = %self.lines.scope().pipeline_id,
            position = self.position,
            lines = self.offsets.len(),
            "log stream closed"
        );
    }

    /// Moves the next line into `pending`; false once the iterator ended.
    fn pull_line(&mut self) -> Result<bool, LokiError> {
        match self.lines.next() {
            Some(Ok(entry)) => {
                let mut bytes = entry.line;
                if bytes.last() != Some(&LINE_SEPARATOR) {
                    bytes.push(LINE_SEPARATOR);
                }
                self.pending = bytes;
                self.pending_pos = 0;
                Ok(true)
            }
            Some(Err(err)) => Err(err),
            None => {
                if self.cancellation.is_cancelled() {
                    return Err(LokiError::Cancelled);
                }
                self.finished = true;
                Ok(false)
            }
        }
    }

    /// Whether a read holding some bytes should pull another line.
    fn keep_filling(&self) -> bool {
        self.lines.scope().complete || self.lines.has_buffered()
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, LokiError> {
        if self.closed {
            return Err(LokiError::Closed);
        }
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut written = 0;
        while written < buf.len() {
            if self.pending_pos == self.pending.len() {
                if self.finished || (written > 0 && !self.keep_filling()) {
                    break;
                }
                match self.pull_line() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) if written > 0 => {
                        self.deferred = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            self.pending_pos += n;
            written += n;
            if n > 0 && self.pending_pos == self.pending.len() {
                let line = self.offsets.record(self.pending.len() as u64);
                trace!(line, bytes = self.pending.len(), "log line emitted");
            }
        }

        self.position += written as u64;
        Ok(written)
    }
}

impl Read for LineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut span = SpanGuard::start(
            self.tracer.as_ref(),
            "LineStream.read",
            vec![(attributes::BYTES_REQUESTED, buf.len().into())],
        );
        let written = span.observe(self.fill(buf))?;
        span.set_attribute(attributes::BYTES_READ, written);
        Ok(written)
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

impl fmt::Debug for LineStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineStream")
            .field("lines", &self.lines)
            .field("position", &self.position)
            .field("emitted_lines", &self.offsets.len())
            .field("finished", &self.finished)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// In-memory view over a [`LineStream`], materialized on demand.
///
/// Nothing is read until a byte is requested; no cap is applied beyond what
/// the backend returns.
#[derive(Debug)]
pub struct LogByteBuffer {
    stream: LineStream,
    data: Vec<u8>,
    exhausted: bool,
}

impl LogByteBuffer {
    const CHUNK: usize = 8 * 1024;

    /// Wraps `stream`.
    #[must_use]
    pub const fn new(stream: LineStream) -> Self {
        Self {
            stream,
            data: Vec::new(),
            exhausted: false,
        }
    }

    /// Bytes materialized so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns true when nothing was materialized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true once the stream reached its end.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Line boundaries of the materialized bytes.
    #[must_use]
    pub const fn offsets(&self) -> &LineOffsetMap {
        self.stream.offsets()
    }

    /// Reads until at least `offset` bytes are held or the stream ends.
    ///
    /// Returns the number of bytes held.
    ///
    /// # Errors
    ///
    /// Returns the stream's read error.
    pub fn fill_to(&mut self, offset: u64) -> io::Result<u64> {
        let mut chunk = [0_u8; Self::CHUNK];
        while !self.exhausted && self.len() < offset {
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                self.exhausted = true;
            } else {
                self.data.extend_from_slice(&chunk[..n]);
            }
        }
        Ok(self.len())
    }

    /// Bytes in `range`, clamped to the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns the stream's read error.
    pub fn slice(&mut self, range: Range<u64>) -> io::Result<&[u8]> {
        let held = self.fill_to(range.end)?;
        let end = usize::try_from(range.end.min(held)).unwrap_or(usize::MAX);
        let start = usize::try_from(range.start).unwrap_or(usize::MAX).min(end);
        Ok(&self.data[start..end])
    }

    /// Reads the whole stream.
    ///
    /// # Errors
    ///
    /// Returns the stream's read error.
    pub fn materialize(&mut self) -> io::Result<&[u8]> {
        self.fill_to(u64::MAX)?;
        Ok(&self.data)
    }

    /// Writes the whole stream to `writer`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns the stream's read error or the writer's error.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<u64> {
        let bytes = self.materialize()?;
        writer.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Closes the underlying stream.
    pub fn close(&mut self) {
        self.stream.close();
    }

    /// Returns the materialized bytes, dropping the stream.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

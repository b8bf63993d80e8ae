//! Client-side event-stream decoding.
//!
//! Reconstructs discrete [`Event`] records from an arbitrarily-chunked
//! text stream. A chunk may contain several complete records, a partial
//! record, or cut a record anywhere, including in the middle of the
//! `\n\n` delimiter. Bytes that do not yet form a complete record are
//! held in a carry-over buffer between decode passes.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::error::{FlowgateError, Result};
use crate::sse::Event;

/// Record delimiter: a blank line.
const RECORD_DELIMITER: &str = "\n\n";

/// Incremental decoder with a carry-over buffer.
///
/// One decoder per response stream; the carry-over buffer is exclusive to
/// it and shrinks as complete records are extracted.
pub struct EventStreamDecoder<T> {
    carry: String,
    failure: Option<FlowgateError>,
    failed: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Default for EventStreamDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventStreamDecoder<T> {
    /// Create a decoder with an empty carry-over buffer.
    pub fn new() -> Self {
        Self {
            carry: String::new(),
            failure: None,
            failed: false,
            _payload: PhantomData,
        }
    }

    /// Bytes currently held back because they do not yet form a complete
    /// record.
    #[inline]
    pub fn carry_over(&self) -> &str {
        &self.carry
    }
}

impl<T: DeserializeOwned> EventStreamDecoder<T> {
    /// Decode one incoming text chunk.
    ///
    /// Appends the chunk to the carry-over buffer, extracts every
    /// delimiter-terminated record, and returns the events they produced
    /// in order. Records without a `data` field are dropped silently. A
    /// malformed `data` payload fails the whole decode sequence, since
    /// partial structured data cannot be safely surfaced; events decoded
    /// earlier in the same pass still come back, and the error is
    /// returned by the next call (an empty chunk flushes it). A failed
    /// decoder yields no further events.
    pub fn decode(&mut self, chunk: &str) -> Result<Vec<Event<T>>> {
        if self.failed {
            return match self.failure.take() {
                Some(e) => Err(e),
                None => Ok(Vec::new()),
            };
        }

        self.carry.push_str(chunk);

        let buffered = std::mem::take(&mut self.carry);
        let mut records: Vec<&str> = buffered.split(RECORD_DELIMITER).collect();

        // The last segment is never a complete record on this pass: it is
        // empty (chunk ended exactly on a delimiter) or partial.
        self.carry = records.pop().unwrap_or_default().to_string();

        let mut events = Vec::new();
        for record in records {
            match Event::parse(record) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.failed = true;
                    self.carry.clear();
                    if events.is_empty() {
                        return Err(e);
                    }
                    // Hold the error until the valid prefix is delivered.
                    self.failure = Some(e);
                    break;
                }
            }
        }

        Ok(events)
    }

    fn take_failure(&mut self) -> Option<FlowgateError> {
        self.failure.take()
    }
}

/// Lazy, single-consumer sequence of decoded events.
///
/// Wraps an upstream text-chunk stream (byte-to-text transcoding happens
/// upstream). Finite: ends with upstream end-of-stream, is fused after an
/// error, and is not restartable. Carry-over left without a closing
/// delimiter at end-of-stream is discarded.
pub struct EventStream<S, T> {
    upstream: S,
    decoder: EventStreamDecoder<T>,
    pending: VecDeque<Event<T>>,
    done: bool,
}

impl<S, T> EventStream<S, T> {
    /// Wrap an upstream text-chunk stream.
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            decoder: EventStreamDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, T> Stream for EventStream<S, T>
where
    S: Stream<Item = Result<String>> + Unpin,
    T: DeserializeOwned + Unpin,
{
    type Item = Result<Event<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.upstream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => match this.decoder.decode(&chunk) {
                    Ok(events) => this.pending.extend(events),
                    Err(e) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    // A failure deferred behind a valid prefix still has
                    // to surface when the upstream ends first.
                    if let Some(e) = this.decoder.take_failure() {
                        return Poll::Ready(Some(Err(e)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

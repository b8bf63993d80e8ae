//! Inbound body assembly.
//!
//! Turns push-delivered byte chunks into a finite, single-pass, lazily
//! consumed pull stream. The transport glue owns an [`InboundSender`] and
//! forwards its data callback into [`deliver`](InboundSender::deliver);
//! the handler consumes the paired [`InboundBody`].
//!
//! # Flow control
//!
//! A push transport cannot refuse a chunk that has already arrived, so
//! `deliver` always accepts. Bounding happens cooperatively: once the
//! number of queued-but-unconsumed chunks reaches the configured limit,
//! `deliver` answers [`FlowSignal::Pause`], telling the transport to stop
//! delivery. [`InboundSender::ready`] resolves when the consumer has
//! drained below the limit and delivery may resume.
//!
//! # Abort
//!
//! When the peer aborts, the stream terminates with
//! [`FlowgateError::PeerAborted`] instead of a normal end-of-stream.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::abort::AbortFlag;
use crate::error::{FlowgateError, Result};

/// Default bound on queued-but-unconsumed chunks before delivery pauses.
pub const DEFAULT_QUEUE_LIMIT: usize = 16;

/// Delivery verdict returned to the transport after each pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// Keep delivering.
    Continue,
    /// Queue is full; pause delivery until [`InboundSender::ready`]
    /// resolves.
    Pause,
}

enum Item {
    Chunk(Bytes),
    End,
}

/// Create an inbound assembler for one exchange.
///
/// The sender goes to the transport glue, the body to the handler. Both
/// observe the shared `abort` flag.
pub fn channel(abort: AbortFlag, queue_limit: usize) -> (InboundSender, InboundBody) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(Notify::new());

    let sender = InboundSender {
        tx: Some(tx),
        abort: abort.clone(),
        queued: queued.clone(),
        drained: drained.clone(),
        limit: queue_limit.max(1),
    };

    let body = InboundBody {
        rx,
        abort,
        queued,
        drained,
        done: false,
    };

    (sender, body)
}

/// Push side of the inbound assembler, driven by the transport's data
/// callback.
pub struct InboundSender {
    tx: Option<mpsc::UnboundedSender<Item>>,
    abort: AbortFlag,
    queued: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    limit: usize,
}

impl InboundSender {
    /// Deliver one pushed chunk; `is_last` marks the end of the body.
    ///
    /// The chunk is always accepted. The returned [`FlowSignal`] tells the
    /// transport whether to keep delivering or pause. Chunks delivered
    /// after the end of the body or after an abort are dropped.
    pub fn deliver(&mut self, chunk: Bytes, is_last: bool) -> FlowSignal {
        let Some(tx) = &self.tx else {
            return FlowSignal::Continue;
        };

        if !chunk.is_empty() && tx.send(Item::Chunk(chunk)).is_ok() {
            self.queued.fetch_add(1, Ordering::AcqRel);
        }

        if is_last {
            let _ = tx.send(Item::End);
            self.tx = None;
            return FlowSignal::Continue;
        }

        if self.queued.load(Ordering::Acquire) >= self.limit {
            FlowSignal::Pause
        } else {
            FlowSignal::Continue
        }
    }

    /// Signal that the peer aborted the exchange.
    ///
    /// Sets the shared abort flag and wakes the consumer, which then
    /// observes [`FlowgateError::PeerAborted`].
    pub fn abort(&mut self) {
        self.abort.set();
        // Closing the channel wakes a consumer parked on the next chunk.
        self.tx = None;
        self.drained.notify_waiters();
    }

    /// Wait until delivery may resume after a [`FlowSignal::Pause`].
    ///
    /// Also resolves when the consumer is gone, so a paused transport
    /// never deadlocks on an abandoned body.
    pub async fn ready(&self) {
        loop {
            let Some(tx) = &self.tx else { return };
            if self.queued.load(Ordering::Acquire) < self.limit {
                return;
            }

            // Register before re-checking so a concurrent drain cannot
            // slip between the check and the wait.
            let notified = self.drained.notified();
            if tx.is_closed() || self.queued.load(Ordering::Acquire) < self.limit {
                return;
            }

            tokio::select! {
                _ = notified => {}
                _ = tx.closed() => return,
            }
        }
    }
}

/// Pull side of the inbound assembler: a finite, single-pass byte stream.
pub struct InboundBody {
    rx: mpsc::UnboundedReceiver<Item>,
    abort: AbortFlag,
    queued: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    done: bool,
}

impl InboundBody {
    /// A trivially-empty, already-complete body.
    ///
    /// Used for methods with no semantic body (e.g. read-only requests);
    /// complete regardless of what the transport reports, and immune to
    /// later aborts.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            abort: AbortFlag::new(),
            queued: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            done: true,
        }
    }

    /// Pull the next chunk.
    ///
    /// `Ok(None)` is the normal end of the body. Fails with
    /// [`FlowgateError::PeerAborted`] once the abort flag is observed.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx))
            .await
            .transpose()
    }
}

impl Stream for InboundBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        // Abort is checked at the suspension point, before pulling more
        // data; queued chunks are discarded once the peer is gone.
        if this.abort.is_aborted() {
            this.done = true;
            return Poll::Ready(Some(Err(FlowgateError::PeerAborted)));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Item::Chunk(chunk))) => {
                this.queued.fetch_sub(1, Ordering::AcqRel);
                this.drained.notify_waiters();
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Item::End)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.done = true;
                if this.abort.is_aborted() {
                    Poll::Ready(Some(Err(FlowgateError::PeerAborted)))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

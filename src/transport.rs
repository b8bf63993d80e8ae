//! Transport boundary contract.
//!
//! flowgate does not parse raw HTTP framing. It assumes an underlying
//! transport that already did so and exposes:
//!
//! - chunked body delivery (push callbacks, see [`crate::inbound`])
//! - a non-blocking write primitive with a backpressure signal
//! - atomic write grouping (`cork`)
//! - a writable-again notification when backpressure clears
//!
//! The [`Connection`] trait captures the write side of that contract.
//! Writable-again callbacks are bridged into the async world through a
//! [`WritableNotifier`], which the transport's event loop drives.

use tokio::sync::mpsc;

use crate::error::Result;

/// Outcome of a single non-blocking write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All bytes were flushed to the transport.
    Flushed,
    /// The transport signalled backpressure; the caller must suspend and
    /// resume from its offset cursor on the next writable notification.
    Backpressure,
}

/// Write side of one connection.
///
/// A connection handle is exclusively owned by one exchange for its
/// duration; the outbound writer takes it by value, so the type system
/// rules out concurrent writers on the same connection.
pub trait Connection: Send {
    /// Attempt a non-blocking write.
    ///
    /// `Ok(Flushed)` means every byte was accepted and drained;
    /// `Ok(Backpressure)` means the transport cannot currently take the
    /// data. `Err` is a transport write failure, which the outbound path
    /// treats exactly like a peer abort.
    fn write(&mut self, data: &[u8]) -> Result<WriteOutcome>;

    /// Write the response status line.
    fn write_status(&mut self, status: u16, reason: &str);

    /// Write one response header.
    fn write_header(&mut self, name: &str, value: &str);

    /// Finalize the response framing. Called exactly once on normal
    /// completion, and never after an abort.
    fn end(&mut self);

    /// Group writes into one physical transmission unit.
    ///
    /// The default implementation runs the closure directly, for
    /// transports without a grouping primitive.
    fn cork(&mut self, f: impl FnOnce(&mut Self))
    where
        Self: Sized,
    {
        f(self)
    }
}

/// Bridge from the transport's writable-again callback to the writer task.
///
/// The transport event loop calls [`writable`](Self::writable) each time
/// write capacity becomes available, mirroring an
/// `onWritableAgain(availableBytes) -> bool` callback: the return value
/// tells the transport whether to keep notifying.
pub struct WritableNotifier {
    tx: mpsc::UnboundedSender<usize>,
}

impl WritableNotifier {
    /// Deliver a writable-again notification with the currently available
    /// byte count.
    ///
    /// Returns `false` once the writer is gone and notifications should
    /// stop.
    pub fn writable(&self, available: usize) -> bool {
        self.tx.send(available).is_ok()
    }
}

/// Create the writable-notification channel for one connection.
///
/// The notifier goes to the transport glue; the receiver is owned by the
/// outbound writer. Unbounded is safe here: the transport emits at most
/// one notification per drained write, and the writer consumes them at
/// every suspension point.
pub(crate) fn writable_channel() -> (WritableNotifier, mpsc::UnboundedReceiver<usize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WritableNotifier { tx }, rx)
}

//! Outbound streaming writer.
//!
//! Drains an [`OutboundBody`] into a connection's non-blocking write
//! primitive under flow control:
//!
//! 1. Bodies with a declared length below [`SMALL_BODY_LIMIT`] are
//!    buffered whole and issued as a single write, with no per-chunk
//!    looping.
//! 2. Larger or undeclared bodies are pulled one chunk at a time. A
//!    backpressure verdict suspends the writer until the transport's
//!    writable-again notification, after which the remainder of the
//!    current chunk is written in `available`-sized slices, advancing an
//!    offset cursor. The next chunk is pulled only once the current one
//!    is fully flushed.
//! 3. Status/header writes and each body write are corked, so they are
//!    never interleaved with other activity on the connection.
//! 4. The abort flag is observed at every suspension point; once set, no
//!    further pulls, writes, or finalization happen.
//!
//! The writer owns its connection, so one connection can never have two
//! active writers.

use bytes::BytesMut;
use tokio::sync::mpsc;

use crate::abort::AbortFlag;
use crate::body::OutboundBody;
use crate::error::{FlowgateError, Result};
use crate::transport::{writable_channel, Connection, WritableNotifier, WriteOutcome};

/// Bodies with a declared length below this take the buffered
/// single-write path (64 KiB).
pub const SMALL_BODY_LIMIT: usize = 64 * 1024;

/// Status line and headers of one response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// A head with the given status code and its canonical reason phrase.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: canonical_reason(status).to_string(),
            headers: Vec::new(),
        }
    }

    /// Override the reason phrase.
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    /// Append one header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// The status code.
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }
}

/// Reason phrases for the codes this layer commonly emits; anything else
/// goes on the wire with an empty phrase, which the framing permits.
fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Drains one response body into one connection.
///
/// Consumes itself on [`send`](Self::send): exactly one response per
/// writer, exactly one active writer per connection.
pub struct StreamWriter<C: Connection> {
    conn: C,
    abort: AbortFlag,
    writable: mpsc::UnboundedReceiver<usize>,
}

impl<C: Connection> StreamWriter<C> {
    /// Take exclusive ownership of a connection's write side.
    ///
    /// The returned [`WritableNotifier`] goes to the transport glue, which
    /// forwards writable-again callbacks into it.
    pub fn new(conn: C, abort: AbortFlag) -> (Self, WritableNotifier) {
        let (notifier, writable) = writable_channel();
        (
            Self {
                conn,
                abort,
                writable,
            },
            notifier,
        )
    }

    /// Write the full response: head, body, finalization.
    ///
    /// Returns `Err(PeerAborted)` if the abort flag was set at any
    /// suspension point (the response is abandoned, nothing is finalized)
    /// and `Err(WriteFailed)` on a transport write failure, which also
    /// sets the abort flag. Body-producer errors are propagated verbatim
    /// and fail the exchange.
    pub async fn send(mut self, head: &ResponseHead, body: OutboundBody) -> Result<()> {
        if self.abort.is_aborted() {
            return Err(FlowgateError::PeerAborted);
        }

        match body.declared_len() {
            Some(len) if len < SMALL_BODY_LIMIT => self.send_buffered(head, body, len).await,
            _ => self.send_streaming(head, body).await,
        }
    }

    /// Small-body fast path: buffer everything, then one corked group
    /// carrying the head, a single body write, and finalization. If that
    /// single write is refused, it is drained through the notification
    /// loop and finalized separately.
    async fn send_buffered(
        &mut self,
        head: &ResponseHead,
        mut body: OutboundBody,
        declared_len: usize,
    ) -> Result<()> {
        let mut buf = BytesMut::with_capacity(declared_len);

        while let Some(chunk) = body.next_chunk().await? {
            // Suspension point between pulls.
            if self.abort.is_aborted() {
                return Err(FlowgateError::PeerAborted);
            }
            buf.extend_from_slice(&chunk);
        }

        if self.abort.is_aborted() {
            return Err(FlowgateError::PeerAborted);
        }

        let mut verdict = Ok(WriteOutcome::Flushed);
        self.conn.cork(|conn| {
            write_head(conn, head);
            if !buf.is_empty() {
                verdict = conn.write(&buf);
            }
            if matches!(verdict, Ok(WriteOutcome::Flushed)) {
                conn.end();
            }
        });

        match self.fail_on_write_error(verdict)? {
            WriteOutcome::Flushed => {}
            // The single write was refused outright; drain it through the
            // writable-notification loop, then finalize.
            WriteOutcome::Backpressure => {
                self.drain_chunk(&buf, 0).await?;
                self.finalize();
            }
        }

        Ok(())
    }

    /// General path: corked head group, then chunk-at-a-time streaming.
    async fn send_streaming(&mut self, head: &ResponseHead, mut body: OutboundBody) -> Result<()> {
        self.conn.cork(|conn| write_head(conn, head));

        loop {
            if self.abort.is_aborted() {
                return Err(FlowgateError::PeerAborted);
            }

            let Some(chunk) = body.next_chunk().await? else {
                break;
            };

            if self.abort.is_aborted() {
                return Err(FlowgateError::PeerAborted);
            }

            if chunk.is_empty() {
                continue;
            }

            let mut verdict = Ok(WriteOutcome::Flushed);
            self.conn.cork(|conn| verdict = conn.write(&chunk));

            match self.fail_on_write_error(verdict)? {
                WriteOutcome::Flushed => {}
                WriteOutcome::Backpressure => self.drain_chunk(&chunk, 0).await?,
            }
        }

        if self.abort.is_aborted() {
            return Err(FlowgateError::PeerAborted);
        }

        self.finalize();
        Ok(())
    }

    /// Flush `chunk[offset..]` across writable-again notifications.
    ///
    /// Each notification allows one sub-write of at most `available`
    /// bytes; the offset advances only when a sub-write flushes. The
    /// abort flag is re-checked at every notification.
    async fn drain_chunk(&mut self, chunk: &[u8], mut offset: usize) -> Result<()> {
        while offset < chunk.len() {
            let available = tokio::select! {
                _ = self.abort.aborted() => return Err(FlowgateError::PeerAborted),
                notified = self.writable.recv() => match notified {
                    Some(n) => n,
                    // Notifier gone without an abort: the transport side
                    // was torn down mid-response.
                    None => {
                        self.abort.set();
                        return Err(FlowgateError::WriteFailed(
                            "writable notifications stopped".to_string(),
                        ));
                    }
                },
            };

            if self.abort.is_aborted() {
                return Err(FlowgateError::PeerAborted);
            }

            let end = chunk.len().min(offset + available);
            if end == offset {
                continue;
            }

            let mut verdict = Ok(WriteOutcome::Flushed);
            self.conn.cork(|conn| verdict = conn.write(&chunk[offset..end]));

            match self.fail_on_write_error(verdict)? {
                WriteOutcome::Flushed => offset = end,
                // Still congested; keep the cursor and wait again.
                WriteOutcome::Backpressure => {}
            }
        }

        Ok(())
    }

    /// Normal-completion finalization of the response framing.
    fn finalize(&mut self) {
        self.conn.cork(|conn| conn.end());
    }

    /// Transport write failures are equivalent to an abort: set the flag
    /// and surface a `WriteFailed`.
    fn fail_on_write_error(&self, verdict: Result<WriteOutcome>) -> Result<WriteOutcome> {
        verdict.map_err(|e| {
            self.abort.set();
            match e {
                failure @ FlowgateError::WriteFailed(_) => failure,
                other => FlowgateError::WriteFailed(other.to_string()),
            }
        })
    }
}

fn write_head<C: Connection>(conn: &mut C, head: &ResponseHead) {
    conn.write_status(head.status, &head.reason);
    for (name, value) in &head.headers {
        conn.write_header(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use bytes::Bytes;
    use futures_core::Stream;

    use crate::transport::mock::{MockConnection, MockEvent, Verdict};

    /// Chunk stream that counts how many chunks have been pulled.
    struct CountingStream {
        chunks: VecDeque<Bytes>,
        pulled: Arc<AtomicUsize>,
    }

    impl Stream for CountingStream {
        type Item = Result<Bytes>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            match this.chunks.pop_front() {
                Some(chunk) => {
                    this.pulled.fetch_add(1, Ordering::SeqCst);
                    Poll::Ready(Some(Ok(chunk)))
                }
                None => Poll::Ready(None),
            }
        }
    }

    fn counting_body(chunks: Vec<&'static [u8]>) -> (OutboundBody, Arc<AtomicUsize>) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let stream = CountingStream {
            chunks: chunks.into_iter().map(Bytes::from_static).collect(),
            pulled: pulled.clone(),
        };
        (OutboundBody::from_stream(stream), pulled)
    }

    #[tokio::test]
    async fn test_small_body_single_write_regardless_of_granularity() {
        let conn = MockConnection::default();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        // Many tiny chunks, but a declared length under the threshold.
        let chunks = futures_util::stream::iter(
            (0..100).map(|i| Ok(Bytes::from(vec![i as u8; 10]))),
        );
        let body = OutboundBody::with_declared_len(chunks, 1000);

        writer
            .send(&ResponseHead::new(200), body)
            .await
            .unwrap();

        let writes = conn.body_writes();
        assert_eq!(writes.len(), 1, "small body must be one write call");
        assert_eq!(writes[0].len(), 1000);
        assert!(conn.ended());
    }

    #[tokio::test]
    async fn test_small_body_head_write_and_end_share_one_cork() {
        let conn = MockConnection::default();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        let head = ResponseHead::new(200).header("content-type", "text/plain");
        let body = OutboundBody::from_bytes(Bytes::from_static(b"hi"));

        writer.send(&head, body).await.unwrap();

        let state = conn.0.lock().unwrap();
        assert_eq!(
            state.events,
            vec![
                MockEvent::CorkStart,
                MockEvent::Status(200),
                MockEvent::Header("content-type".to_string(), "text/plain".to_string()),
                MockEvent::Write(b"hi".to_vec()),
                MockEvent::End,
                MockEvent::CorkEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_small_body_drains_then_finalizes() {
        let conn = MockConnection::scripted(vec![Verdict::Backpressure]);
        let (writer, notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        notifier.writable(2);

        writer
            .send(&ResponseHead::new(200), OutboundBody::from_bytes("hi"))
            .await
            .unwrap();

        assert_eq!(conn.transmitted(), b"hi".to_vec());
        assert!(conn.ended());
    }

    #[tokio::test]
    async fn test_declared_len_at_threshold_streams_per_chunk() {
        let conn = MockConnection::default();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        let data: Vec<u8> = (0..SMALL_BODY_LIMIT).map(|i| i as u8).collect();
        let half = SMALL_BODY_LIMIT / 2;
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from(data[..half].to_vec())),
            Ok(Bytes::from(data[half..].to_vec())),
        ]);
        let body = OutboundBody::with_declared_len(chunks, SMALL_BODY_LIMIT);

        writer.send(&ResponseHead::new(200), body).await.unwrap();

        // At the threshold the buffered path is skipped.
        assert_eq!(conn.body_writes().len(), 2);
        assert_eq!(conn.transmitted(), data);
        assert!(conn.ended());
    }

    #[tokio::test]
    async fn test_streamed_bytes_keep_order_across_writable_notifications() {
        let produced: Vec<u8> = (0u32..300).map(|i| (i % 251) as u8).collect();

        // First body write refused; drained in 128-byte sub-writes.
        let conn = MockConnection::scripted(vec![Verdict::Backpressure]);
        let abort = AbortFlag::new();
        let (writer, notifier) = StreamWriter::new(conn.clone(), abort);

        notifier.writable(128);
        notifier.writable(128);
        notifier.writable(128);

        let chunk = Bytes::from(produced.clone());
        let body = OutboundBody::from_stream(futures_util::stream::iter(vec![Ok(chunk)]));

        writer.send(&ResponseHead::new(200), body).await.unwrap();

        assert_eq!(conn.transmitted(), produced);
        let writes = conn.body_writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].len(), 128);
        assert_eq!(writes[1].len(), 128);
        assert_eq!(writes[2].len(), 44);
        assert!(conn.ended());
    }

    #[tokio::test]
    async fn test_refused_subwrite_does_not_advance_offset() {
        let produced: Vec<u8> = (0u8..200).collect();

        // Initial write refused, first sub-write refused too, then all
        // sub-writes flush.
        let conn = MockConnection::scripted(vec![Verdict::Backpressure, Verdict::Backpressure]);
        let (writer, notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        notifier.writable(100); // refused, cursor stays at 0
        notifier.writable(100); // flushes bytes 0..100
        notifier.writable(100); // flushes bytes 100..200

        let body =
            OutboundBody::from_stream(futures_util::stream::iter(vec![Ok(Bytes::from(
                produced.clone(),
            ))]));

        writer.send(&ResponseHead::new(200), body).await.unwrap();

        assert_eq!(conn.transmitted(), produced);
        assert!(conn.ended());
    }

    #[tokio::test]
    async fn test_no_pull_while_chunk_unflushed() {
        let conn = MockConnection::scripted(vec![Verdict::Backpressure]);
        let (writer, notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        let (body, pulled) = counting_body(vec![b"first-chunk", b"second-chunk"]);
        let pulled_probe = pulled.clone();

        let task = tokio::spawn(async move {
            let head = ResponseHead::new(200);
            writer.send(&head, body).await
        });

        // Give the writer time to pull the first chunk and hit
        // backpressure.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            pulled_probe.load(Ordering::SeqCst),
            1,
            "second pull must wait for the first chunk to flush"
        );

        // Unblock: the chunk flushes in one sub-write.
        notifier.writable(64);

        task.await.unwrap().unwrap();
        assert_eq!(pulled_probe.load(Ordering::SeqCst), 2);
        assert_eq!(conn.transmitted(), b"first-chunksecond-chunk".to_vec());
    }

    #[tokio::test]
    async fn test_abort_stops_writes_and_finalization() {
        let conn = MockConnection::scripted(vec![Verdict::Backpressure]);
        let abort = AbortFlag::new();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), abort.clone());

        let (body, pulled) = counting_body(vec![b"stuck-chunk", b"never-pulled"]);

        let task = tokio::spawn(async move {
            let head = ResponseHead::new(200);
            writer.send(&head, body).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        abort.set();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(FlowgateError::PeerAborted)));

        assert_eq!(pulled.load(Ordering::SeqCst), 1, "no pulls after abort");
        assert!(conn.body_writes().is_empty(), "no writes after abort");
        assert!(!conn.ended(), "no finalization after abort");
    }

    #[tokio::test]
    async fn test_abort_before_send_writes_nothing() {
        let conn = MockConnection::default();
        let abort = AbortFlag::new();
        abort.set();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), abort);

        let result = writer
            .send(&ResponseHead::new(200), OutboundBody::from_bytes("x"))
            .await;

        assert!(matches!(result, Err(FlowgateError::PeerAborted)));
        assert_eq!(conn.events_len(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_equivalent_to_abort() {
        let conn = MockConnection::scripted(vec![Verdict::Fail]);
        let abort = AbortFlag::new();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), abort.clone());

        let result = writer
            .send(&ResponseHead::new(200), OutboundBody::from_bytes("payload"))
            .await;

        assert!(matches!(result, Err(FlowgateError::WriteFailed(_))));
        assert!(abort.is_aborted());
        assert!(!conn.ended());
    }

    #[tokio::test]
    async fn test_body_producer_error_fails_exchange() {
        let conn = MockConnection::default();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        let body = OutboundBody::from_stream(crate::body::FailingStream(Some(
            FlowgateError::Decode("bad chunk".to_string()),
        )));

        let result = writer.send(&ResponseHead::new(200), body).await;

        assert!(matches!(result, Err(FlowgateError::Decode(_))));
        assert!(!conn.ended());
    }

    #[tokio::test]
    async fn test_empty_body_finalizes_immediately() {
        let conn = MockConnection::default();
        let (writer, _notifier) = StreamWriter::new(conn.clone(), AbortFlag::new());

        writer
            .send(&ResponseHead::new(204), OutboundBody::empty())
            .await
            .unwrap();

        assert!(conn.body_writes().is_empty());
        assert!(conn.ended());
    }
}

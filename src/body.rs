//! Outbound body contract.
//!
//! An [`OutboundBody`] is any lazy producer of byte chunks, optionally
//! paired with a declared total length. A declared length below the
//! writer's small-body threshold enables the single-write fast path.
//!
//! Pull-based by construction: at any point, at most one chunk is in
//! flight between the producer and the writer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;

use crate::error::Result;
#[cfg(test)]
use crate::error::FlowgateError;

/// A type-erased, fallible async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Lazy outbound byte producer with an optional declared total length.
pub struct OutboundBody {
    stream: ByteStream,
    declared_len: Option<usize>,
}

impl OutboundBody {
    /// Body from an arbitrary chunk stream with no declared length.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            declared_len: None,
        }
    }

    /// Body from a chunk stream with a declared total length.
    ///
    /// The writer trusts the declaration only for path selection; the
    /// bytes on the wire are always exactly what the stream produces.
    pub fn with_declared_len<S>(stream: S, len: usize) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            declared_len: Some(len),
        }
    }

    /// Fully-buffered body; the length is declared automatically.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len();
        Self {
            stream: Box::pin(OnceStream(if data.is_empty() { None } else { Some(data) })),
            declared_len: Some(len),
        }
    }

    /// A body with no bytes at all.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// The declared total length, if one was provided.
    #[inline]
    pub fn declared_len(&self) -> Option<usize> {
        self.declared_len
    }

    /// Pull the next chunk from the producer.
    ///
    /// Producer errors fail the exchange and are propagated verbatim.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        std::future::poll_fn(|cx| self.stream.as_mut().poll_next(cx))
            .await
            .transpose()
    }
}

impl std::fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundBody")
            .field("declared_len", &self.declared_len)
            .finish()
    }
}

/// A stream that yields a single `Bytes` value then ends.
struct OnceStream(Option<Bytes>);

impl Stream for OnceStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().0.take().map(Ok))
    }
}

/// A stream that fails immediately; useful in tests for producer errors.
#[cfg(test)]
pub(crate) struct FailingStream(pub Option<FlowgateError>);

#[cfg(test)]
impl Stream for FailingStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().0.take().map(Err))
    }
}

//! # flowgate
//!
//! Streaming adapter between a callback-driven non-blocking transport and
//! pull-based request/response byte streams.
//!
//! The underlying transport pushes body chunks, signals peer aborts, and
//! exposes a write primitive that may refuse data under backpressure.
//! flowgate bridges that event-driven surface to handler code that wants
//! to *pull* an inbound body and *stream* an outbound one, with flow
//! control, abort propagation, and write ordering handled in one place.
//!
//! ## Architecture
//!
//! - **Inbound** ([`inbound`]): push-delivered chunks become a finite,
//!   single-pass pull stream with cooperative queue bounding.
//! - **Outbound** ([`outbound`]): a lazy body is drained into the
//!   connection; small declared bodies go out in a single write, larger
//!   ones resume from an offset cursor on each writable notification.
//! - **Exchange** ([`server`]): one request/response cycle wiring context,
//!   inbound, outbound, and the shared abort flag together.
//! - **Events** ([`sse`]): client-side decoding of `text/event-stream`
//!   responses into typed records.
//!
//! ## Example
//!
//! ```ignore
//! use flowgate::{Exchange, OutboundBody, ResponseHead};
//!
//! async fn handle(mut exchange: Exchange<impl flowgate::Connection>) {
//!     let mut body = exchange.take_body().unwrap();
//!     let mut received = Vec::new();
//!     while let Some(chunk) = body.next_chunk().await.unwrap() {
//!         received.extend_from_slice(&chunk);
//!     }
//!
//!     let head = ResponseHead::new(200).header("content-type", "application/octet-stream");
//!     exchange.respond(&head, OutboundBody::from_bytes(received)).await.unwrap();
//! }
//! ```

pub mod abort;
pub mod body;
pub mod context;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod server;
pub mod sse;
pub mod transport;

pub use abort::AbortFlag;
pub use body::{ByteStream, OutboundBody};
pub use context::{RequestContext, RequestScope};
pub use error::{FlowgateError, Result};
pub use inbound::{FlowSignal, InboundBody, InboundSender};
pub use outbound::{ResponseHead, StreamWriter, SMALL_BODY_LIMIT};
pub use server::{Exchange, ServeOptions, Server, TransportHooks};
pub use sse::{Event, EventStream, EventStreamDecoder};
pub use transport::{Connection, WritableNotifier, WriteOutcome};

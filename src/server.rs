//! Exchange driver and server facade.
//!
//! An [`Exchange`] wires the per-connection pieces together for one
//! request/response cycle: the context scope, the inbound assembler, the
//! outbound writer and the shared abort flag. Its counterpart
//! [`TransportHooks`] is handed to the transport glue, which forwards its
//! push callbacks (data, aborted, writable-again) into it.
//!
//! The [`Server`] is a thin listener facade: it binds, accepts, and hands
//! each raw connection to a user-supplied closure. Framing the wire into
//! exchanges is the transport layer's job, not this crate's.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::abort::AbortFlag;
use crate::body::OutboundBody;
use crate::context::{RequestContext, RequestScope};
use crate::error::{FlowgateError, Result};
use crate::inbound::{self, FlowSignal, InboundBody, InboundSender, DEFAULT_QUEUE_LIMIT};
use crate::outbound::{ResponseHead, StreamWriter};
use crate::transport::{Connection, WritableNotifier};

/// One request/response cycle over one connection.
///
/// Owns the connection's write side (through the writer) and the context
/// scope; dropping the exchange invalidates every [`RequestContext`]
/// handed out for it.
pub struct Exchange<C: Connection> {
    scope: RequestScope,
    ctx: RequestContext,
    body: Option<InboundBody>,
    writer: StreamWriter<C>,
    abort: AbortFlag,
}

/// Push-side counterpart of an [`Exchange`], driven by the transport's
/// event loop.
pub struct TransportHooks {
    data: InboundSender,
    writable: WritableNotifier,
    abort: AbortFlag,
}

impl TransportHooks {
    /// Forward the transport's data callback: one pushed chunk,
    /// `is_last` marking the end of the body.
    pub fn data(&mut self, chunk: Bytes, is_last: bool) -> FlowSignal {
        self.data.deliver(chunk, is_last)
    }

    /// Wait until delivery may resume after a [`FlowSignal::Pause`].
    pub async fn resume(&self) {
        self.data.ready().await
    }

    /// Forward the transport's abort callback. Sets the exchange's abort
    /// flag; idempotent.
    pub fn aborted(&mut self) {
        self.data.abort();
    }

    /// Forward a writable-again notification with the available byte
    /// count. Returns `false` once the writer is gone and notifications
    /// should stop.
    pub fn writable(&self, available: usize) -> bool {
        self.writable.writable(available)
    }

    /// Whether the exchange has been aborted.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

impl<C: Connection> Exchange<C> {
    /// Open an exchange over a connection.
    ///
    /// `resolver` lazily produces the remote address for the context.
    /// `has_body` is false for methods with no semantic body; their
    /// inbound stream is trivially empty regardless of what the
    /// transport delivers.
    pub fn open<F>(conn: C, resolver: F, has_body: bool) -> (Exchange<C>, TransportHooks)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let abort = AbortFlag::new();
        let (scope, ctx) = RequestScope::establish(resolver);
        let (sender, live_body) = inbound::channel(abort.clone(), DEFAULT_QUEUE_LIMIT);
        let (writer, notifier) = StreamWriter::new(conn, abort.clone());

        // For bodyless methods the live receiver is dropped here; pushed
        // chunks then go nowhere while aborts still reach the flag.
        let body = if has_body {
            live_body
        } else {
            InboundBody::empty()
        };

        let exchange = Exchange {
            scope,
            ctx,
            body: Some(body),
            writer,
            abort: abort.clone(),
        };

        let hooks = TransportHooks {
            data: sender,
            writable: notifier,
            abort,
        };

        (exchange, hooks)
    }

    /// The context accessor for this exchange.
    pub fn context(&self) -> RequestContext {
        self.ctx.clone()
    }

    /// This exchange's abort flag.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Take the inbound body stream.
    ///
    /// Single-pass: a second take fails with
    /// [`FlowgateError::BodyAlreadyConsumed`].
    pub fn take_body(&mut self) -> Result<InboundBody> {
        self.body
            .take()
            .ok_or(FlowgateError::BodyAlreadyConsumed)
    }

    /// Write the response and finish the exchange.
    ///
    /// Peer aborts and transport write failures terminate the exchange
    /// silently: no response is possible, so they are logged at debug
    /// level and swallowed. Any other error (notably a failing body
    /// producer) fails the exchange and is surfaced.
    pub async fn respond(self, head: &ResponseHead, body: OutboundBody) -> Result<()> {
        let result = self.writer.send(head, body).await;
        // The scope drops with `self`, invalidating the context.
        drop(self.scope);

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_disconnect() => {
                tracing::debug!("response abandoned: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
}

impl ServeOptions {
    /// Listen on all interfaces at the given port.
    pub fn new(port: u16) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port,
        }
    }

    /// Override the bind host.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }
}

/// Accept-loop facade over a bound listener.
///
/// Accepts connections and spawns the supplied handler for each; the
/// handler owns the raw stream and is responsible for framing it into
/// exchanges.
pub struct Server {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind and start accepting.
    ///
    /// Fails with [`FlowgateError::Listen`] when the address cannot be
    /// bound.
    pub async fn serve<F, Fut>(options: ServeOptions, conn_handler: F) -> Result<Server>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((options.host.as_str(), options.port))
            .await
            .map_err(|e| {
                FlowgateError::Listen(format!("{}:{}: {}", options.host, options.port, e))
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| FlowgateError::Listen(e.to_string()))?;

        let handler = Arc::new(conn_handler);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move { handler(stream, peer).await });
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                }
            }
        });

        Ok(Server {
            local_addr,
            accept_task,
        })
    }

    /// The bound address.
    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for the bound address.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting new connections. In-flight handlers keep running.
    pub fn close(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

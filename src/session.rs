//! Bidirectional RPC sessions.
//!
//! A [`Session`] owns one full-duplex connection and plays both RPC roles
//! over it: calls made through the session travel on this peer's client
//! sub-channel, while calls from the peer arrive on the server sub-channel
//! and are dispatched to registered services. A single reader task
//! demultiplexes inbound frames; a single writer task owns the write half and
//! writes queued frames one at a time, so frames never interleave.
//!
//! Any transport or protocol failure closes the whole session, as does an
//! RPC loop stopping on a message it cannot decode. There is no half-closed
//! state.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec::StreamCodec,
    config::{Role, SessionConfig},
    error::SessionError,
    frame::Tag,
    message::Message,
    metrics,
    pool::BufferPool,
    rpc::{Call, Client, PendingCall, RegisterError, RpcError, Server, Service},
    stream::Stream,
};

mod reader;
mod writer;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared by the session handle, its sub-channels and its tasks.
pub(crate) struct SessionInner {
    role: Role,
    /// Queue feeding the writer task, which owns the write half.
    outbound: mpsc::UnboundedSender<writer::Outbound>,
    pool: BufferPool,
    yin: Arc<Stream>,
    yang: Arc<Stream>,
    client: Client,
    server: Arc<Server>,
    closed: Mutex<bool>,
    cancel: CancellationToken,
}

impl SessionInner {
    pub(crate) fn pool(&self) -> &BufferPool { &self.pool }

    fn stream(&self, tag: Tag) -> &Arc<Stream> {
        match tag {
            Tag::Yin => &self.yin,
            Tag::Yang => &self.yang,
        }
    }

    fn lock_closed(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one of the RPC loops, closing the session if it stops on an error.
    async fn supervise(
        self: Arc<Self>,
        name: &'static str,
        rpc_loop: impl Future<Output = Result<(), RpcError>>,
    ) {
        if let Err(e) = rpc_loop.await {
            self.shutdown(Some(&SessionError::Rpc(Box::new(e)))).await;
        }
        debug!(role = %self.role, name, "rpc loop stopped");
    }

    /// Close the session once; later calls return immediately.
    pub(crate) async fn shutdown(&self, cause: Option<&SessionError>) {
        let already_closed = {
            let mut closed = self.lock_closed();
            std::mem::replace(&mut *closed, true)
        };
        if already_closed {
            return;
        }
        match cause {
            Some(error) if error.is_disconnect() => {
                debug!(role = %self.role, %error, "peer disconnected; closing session");
            }
            Some(error) => {
                metrics::inc_errors();
                warn!(role = %self.role, %error, "closing session after fatal error");
            }
            None => debug!(role = %self.role, "closing session"),
        }
        // Stops the reader and the writer; the writer shuts the connection down.
        self.cancel.cancel();
        if let Err(e) = self.client.close().await {
            debug!(error = %e, "client close failed");
        }
        metrics::dec_sessions();
    }
}

/// One end of a bidirectional RPC session.
///
/// Handles are cheap to clone and all refer to the same session. The session
/// stays open until [`close`](Self::close) is called or the connection fails;
/// dropping handles does not close it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use bidirpc::{MethodTable, Role, Service, Session};
///
/// struct Echo;
///
/// impl Service for Echo {
///     const NAME: &'static str = "Echo";
///
///     fn methods(table: &mut MethodTable<Self>) {
///         table.method("Say", |_: Arc<Self>, text: String| async move {
///             Ok::<_, String>(text)
///         });
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), bidirpc::RpcError> {
/// let (a, b) = tokio::io::duplex(4096);
/// let x = Session::new(a, Role::Yin, 0);
/// let y = Session::new(b, Role::Yang, 0);
/// y.register(Echo).expect("register Echo");
///
/// let reply: String = x.call("Echo.Say", &"hi".to_owned()).await?;
/// assert_eq!(reply, "hi");
/// x.close().await.expect("close never fails");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session over `conn`.
    ///
    /// `role` decides which sub-channel carries this peer's outbound calls;
    /// the other end must use the opposite role. A `buffer_pool_size` of zero
    /// selects the default.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<T>(conn: T, role: impl Into<Role>, buffer_pool_size: usize) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_config(
            conn,
            SessionConfig::new()
                .with_role(role)
                .with_buffer_pool_size(buffer_pool_size),
        )
    }

    /// Start a session over `conn` using `config`.
    ///
    /// Spawns the reader loop and the server loop and returns without
    /// waiting for either.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_config<T>(conn: T, config: SessionConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let role = config.role();
        let (reader, writer) = tokio::io::split(conn);
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (yin_tx, yin_rx) = mpsc::unbounded_channel();
        let (yang_tx, yang_rx) = mpsc::unbounded_channel();
        let server = Arc::new(Server::new());
        let mut responses = None;

        let inner = Arc::new_cyclic(|session| {
            let yin = Arc::new(Stream::new(Tag::Yin, yin_rx, cancel.clone(), session.clone()));
            let yang = Arc::new(Stream::new(Tag::Yang, yang_rx, cancel.clone(), session.clone()));
            let client_stream = match role.client_tag() {
                Tag::Yin => Arc::clone(&yin),
                Tag::Yang => Arc::clone(&yang),
            };
            let (client, client_loop) = Client::with_codec(StreamCodec::new(client_stream));
            responses = Some(client_loop);
            SessionInner {
                role,
                outbound: outbound_tx,
                pool: BufferPool::new(config.buffer_pool_size()),
                yin,
                yang,
                client,
                server: Arc::clone(&server),
                closed: Mutex::new(false),
                cancel: cancel.clone(),
            }
        });
        metrics::inc_sessions();

        let server_codec = StreamCodec::new(Arc::clone(inner.stream(role.server_tag())));
        tokio::spawn(Arc::clone(&inner).supervise("server", server.serve_codec(server_codec)));
        if let Some(responses) = responses {
            tokio::spawn(Arc::clone(&inner).supervise("client", responses));
        }
        tokio::spawn(Arc::clone(&inner).write_loop(Box::new(writer), outbound_rx));
        tokio::spawn(Arc::clone(&inner).read_loop(Box::new(reader), yin_tx, yang_tx));
        debug!(%role, "session started");

        Self { inner }
    }

    /// Role this peer plays.
    #[must_use]
    pub fn role(&self) -> Role { self.inner.role }

    /// Publish `receiver`'s methods to the peer under [`Service::NAME`].
    ///
    /// # Errors
    ///
    /// See [`Server::register_name`].
    pub fn register<S: Service>(&self, receiver: S) -> Result<(), RegisterError> {
        self.inner.server.register(receiver)
    }

    /// Publish `receiver`'s methods to the peer under `name`.
    ///
    /// # Errors
    ///
    /// See [`Server::register_name`].
    pub fn register_name<S: Service>(&self, name: &str, receiver: S) -> Result<(), RegisterError> {
        self.inner.server.register_name(name, receiver)
    }

    /// Call `service_method` on the peer without waiting for the reply.
    ///
    /// The returned future resolves to the finished [`Call`].
    pub async fn go<A: Message>(&self, service_method: &str, args: &A) -> PendingCall {
        self.inner.client.go(service_method, args).await
    }

    /// Call `service_method` on the peer, delivering the finished [`Call`] on
    /// `done`.
    ///
    /// # Errors
    ///
    /// Fails fast with [`RpcError::DoneChannelFull`] when `done` has no free
    /// slot, rather than risking a stalled reply path.
    pub async fn go_with_done<A: Message>(
        &self,
        service_method: &str,
        args: &A,
        done: &mpsc::Sender<Call>,
    ) -> Result<(), RpcError> {
        self.inner
            .client
            .go_with_done(service_method, args, done)
            .await
    }

    /// Call `service_method` on the peer and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Closed`] if the session is or becomes closed
    /// before the reply arrives, and [`RpcError::Remote`] for errors raised
    /// by the peer.
    pub async fn call<A: Message, R: Message>(&self, service_method: &str, args: &A) -> Result<R, RpcError> {
        self.inner.client.call(service_method, args).await
    }

    /// Close the session, failing every pending call.
    ///
    /// Idempotent. Teardown errors are logged, never returned.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the signature uniform with other
    /// connection types.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.inner.shutdown(None).await;
        Ok(())
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { *self.inner.lock_closed() }

    /// Wait until the session is closed, by either side or by an error.
    pub async fn closed(&self) { self.inner.cancel.cancelled().await }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

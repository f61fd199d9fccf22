//! Outbound calls: sequence numbering and reply matching.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{
    RpcError,
    codec::{ClientCodec, RequestHeader},
};
use crate::message::Message;

/// A finished call: the target and either the reply body or the error.
#[derive(Debug)]
pub struct Call {
    service_method: String,
    result: Result<Bytes, RpcError>,
}

impl Call {
    fn failed(service_method: String, error: RpcError) -> Self {
        Self {
            service_method,
            result: Err(error),
        }
    }

    /// The `Service.Method` this call targeted.
    #[must_use]
    pub fn service_method(&self) -> &str { &self.service_method }

    /// The error the call ended with, if any.
    #[must_use]
    pub fn error(&self) -> Option<&RpcError> { self.result.as_ref().err() }

    /// Decode the reply.
    ///
    /// # Errors
    ///
    /// Returns the call's error, or [`RpcError::Decode`] if the reply body is
    /// not a valid `R`.
    pub fn into_reply<R: Message>(self) -> Result<R, RpcError> {
        let body = self.result?;
        let (reply, _) = R::from_bytes(&body)?;
        Ok(reply)
    }
}

/// Where a finished call is delivered.
enum Completion {
    Pending(oneshot::Sender<Call>),
    /// A slot reserved up front, so delivery never blocks the reply path.
    Done(mpsc::OwnedPermit<Call>),
}

impl Completion {
    fn complete(self, call: Call) {
        match self {
            Self::Pending(tx) => {
                // The caller may have dropped its PendingCall; nothing to do.
                let _ = tx.send(call);
            }
            Self::Done(permit) => {
                permit.send(call);
            }
        }
    }
}

struct InFlight {
    service_method: String,
    completion: Completion,
}

#[derive(Default)]
struct ClientState {
    next_seq: u64,
    pending: HashMap<u64, InFlight>,
    /// Set by [`Client::close`].
    closing: bool,
    /// Set once the response loop has stopped.
    shutdown: bool,
}

struct ClientInner {
    codec: Arc<dyn ClientCodec>,
    state: Mutex<ClientState>,
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the client stopped and fail every call still in flight.
    ///
    /// Returns false if `stop` reports the client was already stopped.
    fn fail_all(&self, stop: impl FnOnce(&mut ClientState) -> bool) -> bool {
        let pending = {
            let mut state = self.lock();
            if !stop(&mut state) {
                return false;
            }
            std::mem::take(&mut state.pending)
        };
        for (_, call) in pending {
            call.completion
                .complete(Call::failed(call.service_method, RpcError::Closed));
        }
        true
    }

    /// Dispatch replies until the codec fails, then fail every call still in
    /// flight. A codec reporting [`RpcError::Closed`] is a clean stop.
    async fn receive_responses(self: Arc<Self>) -> Result<(), RpcError> {
        let error = loop {
            let header = match self.codec.read_response_header().await {
                Ok(header) => header,
                Err(e) => break e,
            };
            let body = match self.codec.read_response_body().await {
                Ok(body) => body,
                Err(e) => break e,
            };
            let Some(call) = self.lock().pending.remove(&header.seq) else {
                // The request write failed and the call was already completed.
                debug!(seq = header.seq, "discarding response for unknown call");
                continue;
            };
            let result = if header.error.is_empty() {
                Ok(body)
            } else {
                Err(RpcError::Remote(header.error))
            };
            call.completion.complete(Call {
                service_method: call.service_method,
                result,
            });
        };
        self.fail_all(|state| !std::mem::replace(&mut state.shutdown, true));
        if error.is_closed() { Ok(()) } else { Err(error) }
    }

    async fn send(&self, service_method: &str, args: Result<Vec<u8>, RpcError>, completion: Completion) {
        let body = match args {
            Ok(body) => body,
            Err(e) => return completion.complete(Call::failed(service_method.to_owned(), e)),
        };
        let seq = {
            let mut state = self.lock();
            if state.closing || state.shutdown {
                drop(state);
                return completion.complete(Call::failed(service_method.to_owned(), RpcError::Closed));
            }
            let seq = state.next_seq;
            state.next_seq = state.next_seq.wrapping_add(1);
            state.pending.insert(
                seq,
                InFlight {
                    service_method: service_method.to_owned(),
                    completion,
                },
            );
            seq
        };
        let header = RequestHeader {
            service_method: service_method.to_owned(),
            seq,
        };
        if let Err(e) = self.codec.write_request(&header, &body).await {
            if let Some(call) = self.lock().pending.remove(&seq) {
                call.completion
                    .complete(Call::failed(call.service_method, e));
            }
        }
    }
}

/// Future resolving to a [`Call`] once its reply arrives or the session
/// closes.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    service_method: String,
    rx: oneshot::Receiver<Call>,
}

impl Future for PendingCall {
    type Output = Call;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(call)) => Poll::Ready(call),
            Poll::Ready(Err(_)) => Poll::Ready(Call::failed(
                std::mem::take(&mut self.service_method),
                RpcError::Closed,
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// RPC client bound to one [`ClientCodec`].
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client and start its response loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new<C: ClientCodec>(codec: C) -> Self {
        let (client, responses) = Self::with_codec(codec);
        tokio::spawn(async move {
            if let Err(e) = responses.await {
                warn!(error = %e, "client response loop failed");
            }
        });
        client
    }

    /// Create a client whose response loop the caller drives.
    ///
    /// The loop resolves once the codec stops delivering responses: `Ok` for
    /// a closed transport, otherwise the error that stopped it.
    pub(crate) fn with_codec<C: ClientCodec>(
        codec: C,
    ) -> (Self, impl Future<Output = Result<(), RpcError>> + Send + 'static) {
        let inner = Arc::new(ClientInner {
            codec: Arc::new(codec),
            state: Mutex::new(ClientState::default()),
        });
        let responses = Arc::clone(&inner).receive_responses();
        (Self { inner }, responses)
    }

    /// Send a request and return a future for its completion.
    pub async fn go<A: Message>(&self, service_method: &str, args: &A) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(service_method, encode(args), Completion::Pending(tx))
            .await;
        PendingCall {
            service_method: service_method.to_owned(),
            rx,
        }
    }

    /// Send a request whose completion is delivered on `done`.
    ///
    /// A slot on `done` is reserved before the request is sent, so a busy
    /// channel fails the call immediately instead of stalling reply delivery.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DoneChannelFull`] if `done` has no free capacity
    /// and [`RpcError::DoneChannelClosed`] if its receiver is gone. All other
    /// failures are reported through the delivered [`Call`].
    pub async fn go_with_done<A: Message>(
        &self,
        service_method: &str,
        args: &A,
        done: &mpsc::Sender<Call>,
    ) -> Result<(), RpcError> {
        let permit = done.clone().try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RpcError::DoneChannelFull,
            mpsc::error::TrySendError::Closed(_) => RpcError::DoneChannelClosed,
        })?;
        self.inner
            .send(service_method, encode(args), Completion::Done(permit))
            .await;
        Ok(())
    }

    /// Call `service_method` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Closed`] if the session is or becomes closed,
    /// [`RpcError::Remote`] for errors reported by the peer, and encoding
    /// errors for unencodable arguments or undecodable replies.
    pub async fn call<A: Message, R: Message>(&self, service_method: &str, args: &A) -> Result<R, RpcError> {
        self.go(service_method, args).await.await.into_reply()
    }

    /// Stop accepting calls and fail every call still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Closed`] if the client was already closed.
    pub async fn close(&self) -> Result<(), RpcError> {
        if !self
            .inner
            .fail_all(|state| !std::mem::replace(&mut state.closing, true))
        {
            return Err(RpcError::Closed);
        }
        self.inner.codec.close().await
    }
}

fn encode<A: Message>(args: &A) -> Result<Vec<u8>, RpcError> { Ok(args.to_bytes()?) }

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::{sync::mpsc, time::timeout};

    use super::{Call, Client};
    use crate::rpc::{
        RpcError,
        codec::{ClientCodec, RequestHeader, ResponseHeader},
    };

    /// Codec that answers every request with its own argument bytes.
    struct Loopback {
        replies_tx: mpsc::UnboundedSender<(ResponseHeader, Bytes)>,
        replies_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(ResponseHeader, Bytes)>>,
        body: Mutex<Bytes>,
        fail_writes: bool,
    }

    impl Loopback {
        fn new(fail_writes: bool) -> Self {
            let (replies_tx, replies_rx) = mpsc::unbounded_channel();
            Self {
                replies_tx,
                replies_rx: tokio::sync::Mutex::new(replies_rx),
                body: Mutex::new(Bytes::new()),
                fail_writes,
            }
        }
    }

    #[async_trait]
    impl ClientCodec for Loopback {
        async fn write_request(&self, header: &RequestHeader, body: &[u8]) -> Result<(), RpcError> {
            if self.fail_writes {
                return Err(RpcError::Closed);
            }
            let response = ResponseHeader {
                service_method: header.service_method.clone(),
                seq: header.seq,
                error: if header.service_method == "Fail.Now" {
                    "nope".to_owned()
                } else {
                    String::new()
                },
            };
            self.replies_tx
                .send((response, Bytes::copy_from_slice(body)))
                .map_err(|_| RpcError::Closed)
        }

        async fn read_response_header(&self) -> Result<ResponseHeader, RpcError> {
            let (header, body) = self
                .replies_rx
                .lock()
                .await
                .recv()
                .await
                .ok_or(RpcError::Closed)?;
            *self.body.lock().expect("body lock") = body;
            Ok(header)
        }

        async fn read_response_body(&self) -> Result<Bytes, RpcError> {
            Ok(std::mem::take(&mut *self.body.lock().expect("body lock")))
        }

        async fn close(&self) -> Result<(), RpcError> { Ok(()) }
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn matches_replies_to_calls() {
        let client = Client::new(Loopback::new(false));
        let reply: String = timeout(WAIT, client.call("Echo.Say", &"hi".to_owned()))
            .await
            .expect("reply in time")
            .expect("call succeeds");
        assert_eq!(reply, "hi");
    }

    #[tokio::test]
    async fn remote_errors_are_surfaced() {
        let client = Client::new(Loopback::new(false));
        let result: Result<u8, _> = timeout(WAIT, client.call("Fail.Now", &1u8)).await.expect("reply in time");
        assert!(matches!(result, Err(RpcError::Remote(msg)) if msg == "nope"));
    }

    #[tokio::test]
    async fn write_failures_complete_the_call() {
        let client = Client::new(Loopback::new(true));
        let result: Result<u8, _> = timeout(WAIT, client.call("Echo.Say", &1u8)).await.expect("no hang");
        assert!(matches!(result, Err(RpcError::Closed)));
    }

    #[tokio::test]
    async fn done_channel_without_capacity_fails_fast() {
        let client = Client::new(Loopback::new(false));
        let (done, mut completions) = mpsc::channel::<Call>(1);
        client.go_with_done("Echo.Say", &1u8, &done).await.expect("first slot free");
        assert!(matches!(
            client.go_with_done("Echo.Say", &2u8, &done).await,
            Err(RpcError::DoneChannelFull)
        ));
        let call = timeout(WAIT, completions.recv()).await.expect("completion in time").expect("call delivered");
        assert_eq!(call.into_reply::<u8>().expect("reply"), 1);
    }

    #[tokio::test]
    async fn calls_after_close_fail_immediately() {
        let client = Client::new(Loopback::new(false));
        client.close().await.expect("first close");
        assert!(matches!(client.close().await, Err(RpcError::Closed)));
        let result: Result<u8, _> = timeout(WAIT, client.call("Echo.Say", &1u8)).await.expect("no hang");
        assert!(matches!(result, Err(RpcError::Closed)));
    }
}

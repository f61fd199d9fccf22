//! Bridge between a sub-channel and the RPC engine's codec contract.
//!
//! Each RPC message travels as exactly one frame: the bincode-encoded
//! [`RequestHeader`] or [`ResponseHeader`] followed by the already-encoded
//! body. Reading a header consumes a frame from the sub-channel and stashes
//! the trailing bytes for the matching body read.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    message::Message,
    rpc::{ClientCodec, RequestHeader, ResponseHeader, RpcError, ServerCodec},
    stream::Stream,
};

/// Codec carrying RPC messages over one [`Stream`].
///
/// A session builds two: one for its client role and one for its server
/// role, each bound to its own sub-channel.
pub struct StreamCodec {
    stream: Arc<Stream>,
    body: Mutex<Option<Bytes>>,
}

impl StreamCodec {
    /// Bind a codec to `stream`. The codec must be the stream's only reader.
    #[must_use]
    pub fn new(stream: Arc<Stream>) -> Self {
        Self {
            stream,
            body: Mutex::new(None),
        }
    }

    fn body(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_header<H: Message>(&self) -> Result<H, RpcError> {
        let frame = self.stream.recv().await.ok_or(RpcError::Closed)?;
        let decoded = H::from_bytes(&frame).map(|(header, used)| {
            *self.body() = Some(Bytes::copy_from_slice(&frame[used..]));
            header
        });
        self.stream.release(frame);
        Ok(decoded?)
    }

    fn take_body(&self) -> Bytes { self.body().take().unwrap_or_default() }

    async fn write_message<H: Message>(&self, header: &H, body: &[u8]) -> Result<(), RpcError> {
        let mut message = header.to_bytes()?;
        message.extend_from_slice(body);
        Ok(self.stream.write(&message).await?)
    }
}

#[async_trait]
impl ClientCodec for StreamCodec {
    async fn write_request(&self, header: &RequestHeader, body: &[u8]) -> Result<(), RpcError> {
        self.write_message(header, body).await
    }

    async fn read_response_header(&self) -> Result<ResponseHeader, RpcError> {
        self.read_header().await
    }

    async fn read_response_body(&self) -> Result<Bytes, RpcError> { Ok(self.take_body()) }

    // The session owns the connection and tears it down itself.
    async fn close(&self) -> Result<(), RpcError> { Ok(()) }
}

#[async_trait]
impl ServerCodec for StreamCodec {
    async fn read_request_header(&self) -> Result<RequestHeader, RpcError> {
        self.read_header().await
    }

    async fn read_request_body(&self) -> Result<Bytes, RpcError> { Ok(self.take_body()) }

    async fn write_response(&self, header: &ResponseHeader, body: &[u8]) -> Result<(), RpcError> {
        self.write_message(header, body).await
    }

    async fn close(&self) -> Result<(), RpcError> { Ok(()) }
}

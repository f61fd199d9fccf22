//! Message codec contract between the RPC engine and its transport.
//!
//! The engine never touches bytes on a connection directly. It writes and
//! reads whole messages, each a header plus an opaque body, through these
//! traits. A message is read in two steps, header first, so the engine can
//! decide how to treat the body before asking for it.

use async_trait::async_trait;
use bytes::Bytes;

use super::RpcError;

/// Header preceding every request body.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    /// Target in `Service.Method` form.
    pub service_method: String,
    /// Caller-chosen sequence number echoed in the response.
    pub seq: u64,
}

/// Header preceding every response body.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Echo of the request's `service_method`.
    pub service_method: String,
    /// Echo of the request's sequence number.
    pub seq: u64,
    /// Error reported by the server; empty on success.
    pub error: String,
}

/// Client half of the codec contract.
///
/// [`read_response_header`](Self::read_response_header) and
/// [`read_response_body`](Self::read_response_body) are called in strict
/// alternation by a single task; `write_request` may be called concurrently.
#[async_trait]
pub trait ClientCodec: Send + Sync + 'static {
    /// Send one request message.
    async fn write_request(&self, header: &RequestHeader, body: &[u8]) -> Result<(), RpcError>;

    /// Wait for the next response and return its header.
    ///
    /// Returns [`RpcError::Closed`] once the transport is gone.
    async fn read_response_header(&self) -> Result<ResponseHeader, RpcError>;

    /// Body of the response whose header was read last.
    async fn read_response_body(&self) -> Result<Bytes, RpcError>;

    /// Release the codec. The engine calls this once when the client closes.
    async fn close(&self) -> Result<(), RpcError>;
}

/// Server half of the codec contract.
///
/// Reads are driven by a single serve loop; `write_response` is called from
/// one task per in-flight request.
#[async_trait]
pub trait ServerCodec: Send + Sync + 'static {
    /// Wait for the next request and return its header.
    ///
    /// Returns [`RpcError::Closed`] once the transport is gone.
    async fn read_request_header(&self) -> Result<RequestHeader, RpcError>;

    /// Body of the request whose header was read last.
    async fn read_request_body(&self) -> Result<Bytes, RpcError>;

    /// Send one response message.
    async fn write_response(&self, header: &ResponseHeader, body: &[u8]) -> Result<(), RpcError>;

    /// Release the codec. The serve loop calls this once on exit.
    async fn close(&self) -> Result<(), RpcError>;
}

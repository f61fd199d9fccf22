//! Session-level error types.
//!
//! Transport failures and protocol violations are both fatal: either one
//! closes the whole session. [`SessionError::Closed`] is what every operation
//! reports once that has happened.

use std::io;

use thiserror::Error;

use crate::{frame::FrameError, rpc::RpcError};

/// Errors raised by the session transport and framing layers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has been closed, locally or because of an earlier fault.
    #[error("session closed")]
    Closed,
    /// Read or write failure on the underlying connection.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// Malformed frame header or an unencodable outbound body.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    /// The RPC client or server stopped on a message it could not handle.
    #[error("rpc loop failed: {0}")]
    Rpc(#[source] Box<RpcError>),
}

impl SessionError {
    /// Returns true if the peer went away rather than misbehaving.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            Self::Frame(_) => false,
            Self::Rpc(error) => matches!(&**error, RpcError::Session(inner) if inner.is_disconnect()),
        }
    }
}

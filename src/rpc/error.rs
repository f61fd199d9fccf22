//! Error types for RPC calls and service registration.

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use crate::error::SessionError;

/// Errors surfaced to callers of the RPC client and by codecs.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The session closed before or while the call was in flight.
    #[error("session closed")]
    Closed,
    /// The remote service returned an error, or could not dispatch the call.
    #[error("remote error: {0}")]
    Remote(String),
    /// Arguments or a header could not be encoded.
    #[error("failed to encode message")]
    Encode(#[from] EncodeError),
    /// A reply or a header could not be decoded.
    #[error("failed to decode message")]
    Decode(#[from] DecodeError),
    /// The transport rejected a message.
    #[error(transparent)]
    Session(SessionError),
    /// The completion channel passed to `go_with_done` had no free slot.
    #[error("completion channel has no free capacity")]
    DoneChannelFull,
    /// The completion channel passed to `go_with_done` was closed.
    #[error("completion channel closed")]
    DoneChannelClosed,
}

impl RpcError {
    /// Returns true if this error means the session is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool { matches!(self, Self::Closed) }
}

impl From<SessionError> for RpcError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Closed => Self::Closed,
            other => Self::Session(other),
        }
    }
}

/// Errors returned when publishing a service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The service name was empty or contained a `.`.
    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),
    /// A method name was empty or contained a `.`.
    #[error("service {service}: invalid method name {method:?}")]
    InvalidMethodName {
        /// Service being registered.
        service: String,
        /// Offending method name.
        method: String,
    },
    /// The receiver declared no methods.
    #[error("service {0} has no methods")]
    NoMethods(String),
    /// A service with this name is already registered.
    #[error("service already defined: {0}")]
    DuplicateService(String),
}

//! Request/response RPC engine.
//!
//! The engine matches replies to outstanding calls by sequence number and
//! dispatches inbound calls to registered services. It knows nothing about
//! sessions or frames: it talks to its transport only through the
//! [`ClientCodec`] and [`ServerCodec`] contracts.

mod client;
pub mod codec;
mod error;
mod server;
mod service;

pub use client::{Call, Client, PendingCall};
pub use codec::{ClientCodec, RequestHeader, ResponseHeader, ServerCodec};
pub use error::{RegisterError, RpcError};
pub use server::Server;
pub use service::{MethodDescriptor, MethodTable, Service};

#![doc(html_root_url = "https://docs.rs/bidirpc/latest")]
//! Public API for the `bidirpc` library.
//!
//! `bidirpc` lets two peers share one full-duplex connection while each acts
//! as both RPC client and RPC server toward the other. Frames on the wire are
//! tagged with one of two sub-channels; each peer sends its calls on one and
//! serves the other's calls on the second.

pub mod byte_order;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod rpc;
pub mod session;
pub mod stream;

pub use config::{Role, SessionConfig};
pub use error::SessionError;
pub use frame::{FrameError, FrameHeader, Tag};
pub use message::Message;
pub use rpc::{Call, MethodTable, PendingCall, RegisterError, RpcError, Service};
pub use session::Session;

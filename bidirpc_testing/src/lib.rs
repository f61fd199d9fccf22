//! Helpers for exercising [`bidirpc`] sessions in tests.
//!
//! Sessions run over `tokio::io::duplex` pipes. [`session_pair`] connects two
//! real sessions; [`raw_peer`] leaves one end as a bare stream so tests can
//! speak (or mangle) the wire protocol by hand.
//!
//! ```rust
//! use bidirpc_testing::{Echo, session_pair};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (x, y) = session_pair();
//! y.register(Echo).expect("register Echo");
//! let reply: String = x.call("Echo.Say", &"hi".to_owned()).await.expect("call");
//! assert_eq!(reply, "hi");
//! # }
//! ```

pub mod logging;
pub mod peers;
pub mod services;

pub use logging::{LoggerHandle, logger};
pub use peers::{PIPE_CAPACITY, WAIT, raw_peer, read_raw_frame, session_pair, write_raw_frame};
pub use services::{Counter, Echo, Stall};

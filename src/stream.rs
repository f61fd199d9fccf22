//! Logical sub-channels multiplexed over a session.

use std::sync::Weak;

use bytes::BytesMut;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    error::SessionError,
    frame::{FrameHeader, HEADER_SIZE, Tag},
    session::SessionInner,
};

/// One of the two sub-channels of a session.
///
/// Inbound frame bodies are queued by the session's reader loop and drained
/// by a single consumer through [`recv`](Self::recv). Outbound bytes passed to
/// [`write`](Self::write) are framed with this sub-channel's tag and sent
/// through the session's serialised writer.
#[derive(Debug)]
pub struct Stream {
    tag: Tag,
    inbound: Mutex<mpsc::UnboundedReceiver<BytesMut>>,
    cancel: CancellationToken,
    session: Weak<SessionInner>,
}

impl Stream {
    pub(crate) fn new(
        tag: Tag,
        inbound: mpsc::UnboundedReceiver<BytesMut>,
        cancel: CancellationToken,
        session: Weak<SessionInner>,
    ) -> Self {
        Self {
            tag,
            inbound: Mutex::new(inbound),
            cancel,
            session,
        }
    }

    /// Tag identifying this sub-channel on the wire.
    #[must_use]
    pub fn tag(&self) -> Tag { self.tag }

    /// Wait for the next inbound frame body.
    ///
    /// Returns `None` once the session is closed, even if bodies were still
    /// queued. Hand the buffer back with [`release`](Self::release) when done.
    pub async fn recv(&self) -> Option<BytesMut> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            body = async { self.inbound.lock().await.recv().await } => body,
        }
    }

    /// Return a buffer obtained from [`recv`](Self::recv) to the session pool.
    pub fn release(&self, buf: BytesMut) {
        if let Some(session) = self.session.upgrade() {
            session.pool().put(buf);
        }
    }

    /// Send `body` as a single frame on this sub-channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Frame`] if `body` is empty or too large for one
    /// frame (nothing is written and the session stays open),
    /// [`SessionError::Closed`] if the session is closed, and
    /// [`SessionError::Io`] if the write fails, which also closes the session.
    ///
    /// Cancel safe: once this has been polled the frame is either written
    /// whole or the session closes, even if the future is dropped.
    pub async fn write(&self, body: &[u8]) -> Result<(), SessionError> {
        let header = FrameHeader::new(self.tag, body.len())?;
        let session = self.session.upgrade().ok_or(SessionError::Closed)?;
        let mut frame = session.pool().get();
        frame.reserve(HEADER_SIZE + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body);
        session.write(frame).await
    }
}

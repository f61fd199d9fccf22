//! Outbound serialisation: the session's single writer task.
//!
//! Callers hand whole frames to the task through a queue and wait for the
//! outcome. A caller that stops waiting does not affect the frame: once
//! queued it is written in full or the session closes.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, oneshot},
};
use tracing::debug;

use super::{BoxedWriter, SessionInner};
use crate::{
    error::SessionError,
    metrics::{self, Direction},
};

/// A complete frame waiting to be written, with the channel reporting how
/// the write went.
pub(super) struct Outbound {
    pub(super) frame: BytesMut,
    pub(super) done: oneshot::Sender<Result<(), SessionError>>,
}

impl SessionInner {
    /// Write queued frames one at a time until the session closes or a
    /// write fails, then shut the write half down.
    pub(super) async fn write_loop(
        self: Arc<Self>,
        mut conn: BoxedWriter,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                next = outbound.recv() => next,
            };
            let Some(Outbound { frame, done }) = next else {
                break;
            };
            // A frame cut short here is harmless: the session is already closed.
            let written = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                written = async {
                    conn.write_all(&frame).await?;
                    conn.flush().await
                } => Some(written),
            };
            self.pool.put(frame);
            match written {
                None => {
                    let _ = done.send(Err(SessionError::Closed));
                    break;
                }
                Some(Ok(())) => {
                    metrics::inc_frames(Direction::Outbound);
                    // The caller may have stopped waiting.
                    let _ = done.send(Ok(()));
                }
                Some(Err(e)) => {
                    let error = SessionError::Io(e);
                    self.shutdown(Some(&error)).await;
                    let _ = done.send(Err(error));
                    break;
                }
            }
        }
        // Frames still queued fail with `Closed` once their senders drop.
        drop(outbound);
        if let Err(e) = conn.shutdown().await {
            debug!(error = %e, "connection shutdown failed");
        }
        debug!(role = %self.role, "writer loop stopped");
    }

    /// Queue one complete frame and wait until it has been written.
    ///
    /// Dropping the returned future does not tear the frame: the writer task
    /// finishes it regardless.
    pub(crate) async fn write(&self, frame: BytesMut) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            self.pool.put(frame);
            return Err(SessionError::Closed);
        }
        let (done, written) = oneshot::channel();
        if let Err(mpsc::error::SendError(rejected)) = self.outbound.send(Outbound { frame, done }) {
            self.pool.put(rejected.frame);
            return Err(SessionError::Closed);
        }
        written.await.unwrap_or(Err(SessionError::Closed))
    }
}

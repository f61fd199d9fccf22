//! Inbound demultiplexing: the session's single reader loop.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::debug;

use super::{BoxedReader, SessionInner};
use crate::{
    error::SessionError,
    frame::{FrameHeader, HEADER_SIZE, Tag},
    metrics::{self, Direction},
    pool::BufferPool,
};

/// Inbound queues of the two sub-channels.
pub(super) struct Routes {
    pub(super) yin: mpsc::UnboundedSender<BytesMut>,
    pub(super) yang: mpsc::UnboundedSender<BytesMut>,
}

impl Routes {
    fn queue(&self, tag: Tag) -> &mpsc::UnboundedSender<BytesMut> {
        match tag {
            Tag::Yin => &self.yin,
            Tag::Yang => &self.yang,
        }
    }
}

impl SessionInner {
    /// Read frames until the connection fails, a frame is malformed, or the
    /// session is closed, then make sure the session is closed.
    pub(super) async fn read_loop(
        self: Arc<Self>,
        mut conn: BoxedReader,
        yin: mpsc::UnboundedSender<BytesMut>,
        yang: mpsc::UnboundedSender<BytesMut>,
    ) {
        let routes = Routes { yin, yang };
        let cause = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            error = route_frames(&mut conn, &self.pool, &routes) => Some(error),
        };
        if let Some(error) = cause {
            self.shutdown(Some(&error)).await;
        }
        debug!(role = %self.role, "reader loop stopped");
    }
}

/// Move frame bodies from `conn` to their sub-channel queues.
///
/// Only returns on failure, with the error that should close the session.
/// Bodies are read into buffers from `pool`; a buffer is handed back if its
/// body cannot be read in full or its queue is gone.
pub(super) async fn route_frames<R>(conn: &mut R, pool: &BufferPool, routes: &Routes) -> SessionError
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    loop {
        if let Err(e) = conn.read_exact(&mut header).await {
            return e.into();
        }
        let frame = match FrameHeader::decode(header) {
            Ok(frame) => frame,
            Err(e) => return e.into(),
        };
        let mut body = pool.get();
        body.resize(frame.len(), 0);
        if let Err(e) = conn.read_exact(&mut body).await {
            pool.put(body);
            return e.into();
        }
        metrics::inc_frames(Direction::Inbound);
        if let Err(mpsc::error::SendError(body)) = routes.queue(frame.tag()).send(body) {
            pool.put(body);
            return SessionError::Closed;
        }
    }
}

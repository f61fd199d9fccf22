//! Session endpoints connected by in-memory pipes.

use std::time::Duration;

use bidirpc::{FrameHeader, Role, Session, Tag};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// Buffer size of the in-memory pipes.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Upper bound tests wait for anything that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(5);

/// Two connected sessions: the first plays [`Role::Yin`], the second
/// [`Role::Yang`].
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[must_use]
pub fn session_pair() -> (Session, Session) {
    let (a, b) = duplex(PIPE_CAPACITY);
    (Session::new(a, Role::Yin, 0), Session::new(b, Role::Yang, 0))
}

/// A session playing `role` whose peer is a bare stream.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[must_use]
pub fn raw_peer(role: Role) -> (Session, DuplexStream) {
    let (a, b) = duplex(PIPE_CAPACITY);
    (Session::new(a, role, 0), b)
}

/// Write a frame with an arbitrary tag byte, bypassing header validation.
///
/// # Errors
///
/// Returns any I/O error from the pipe.
///
/// # Panics
///
/// Panics if `body` does not fit in the 24-bit length field.
pub async fn write_raw_frame(peer: &mut DuplexStream, tag: u8, body: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(body.len()).expect("test body fits in u32");
    assert!(len <= 0x00FF_FFFF, "test body exceeds the frame length field");
    let [_, hi, mid, lo] = len.to_be_bytes();
    peer.write_all(&[tag, hi, mid, lo]).await?;
    peer.write_all(body).await?;
    peer.flush().await
}

/// Read one frame, returning its tag and body.
///
/// # Errors
///
/// Returns any I/O error from the pipe, or `InvalidData` for a malformed
/// header.
pub async fn read_raw_frame(peer: &mut DuplexStream) -> std::io::Result<(Tag, Vec<u8>)> {
    let mut header = [0u8; 4];
    peer.read_exact(&mut header).await?;
    let header = FrameHeader::decode(header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; header.len()];
    peer.read_exact(&mut body).await?;
    Ok((header.tag(), body))
}

//! Frame header codec.
//!
//! Every frame on the wire is a fixed four-byte header followed by an opaque
//! body:
//!
//! ```text
//! +--------+------------------------------+------------------+
//! | tag u8 | body length, u24 big-endian  | body (len bytes) |
//! +--------+------------------------------+------------------+
//! ```
//!
//! The tag selects one of the two sub-channels (`1` = [`Tag::Yin`],
//! `2` = [`Tag::Yang`]). The body length is at least one byte and at most
//! [`MAX_BODY_LEN`]. Both peers must agree on this layout; it never changes.

use thiserror::Error;

use crate::byte_order::{MAX_U24, read_network_u24, write_network_u24};

/// Size of an encoded frame header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest body a single frame can carry (16 MiB - 1).
pub const MAX_BODY_LEN: usize = MAX_U24 as usize;

/// Logical sub-channel identifier carried in the first header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Sub-channel with wire value `1`.
    Yin = 1,
    /// Sub-channel with wire value `2`.
    Yang = 2,
}

impl Tag {
    /// Wire value of the tag.
    #[must_use]
    pub fn as_u8(self) -> u8 { self as u8 }
}

impl TryFrom<u8> for Tag {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Yin),
            2 => Ok(Self::Yang),
            other => Err(FrameError::InvalidTag(other)),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yin => f.write_str("yin"),
            Self::Yang => f.write_str("yang"),
        }
    }
}

/// Errors raised while encoding or decoding a frame header.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The tag byte is not a known sub-channel.
    #[error("invalid sub-channel tag {0}")]
    InvalidTag(u8),
    /// The header announces (or the caller supplied) an empty body.
    #[error("empty frame body not permitted")]
    EmptyBody,
    /// The body does not fit in the 24-bit length field.
    #[error("frame body exceeds max length: {size} > {max}")]
    BodyTooLarge {
        /// Requested body size.
        size: usize,
        /// Largest permitted body size.
        max: usize,
    },
}

/// Decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    tag: Tag,
    len: usize,
}

impl FrameHeader {
    /// Build a header for a body of `len` bytes on `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::EmptyBody`] for `len == 0` and
    /// [`FrameError::BodyTooLarge`] when `len` exceeds [`MAX_BODY_LEN`].
    pub fn new(tag: Tag, len: usize) -> Result<Self, FrameError> {
        if len == 0 {
            return Err(FrameError::EmptyBody);
        }
        if len > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLarge {
                size: len,
                max: MAX_BODY_LEN,
            });
        }
        Ok(Self { tag, len })
    }

    /// Sub-channel the body belongs to.
    #[must_use]
    pub fn tag(&self) -> Tag { self.tag }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.len }

    /// Always `false`: a valid header never describes an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Encode the header into its four-byte wire form.
    ///
    /// # Examples
    ///
    /// ```
    /// use bidirpc::frame::{FrameHeader, Tag};
    ///
    /// let header = FrameHeader::new(Tag::Yang, 0x0102).expect("valid header");
    /// assert_eq!(header.encode(), [2, 0x00, 0x01, 0x02]);
    /// ```
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        // `new` bounds len to MAX_U24, so the conversion cannot fail.
        let len = u32::try_from(self.len).unwrap_or(MAX_U24);
        let [hi, mid, lo] = write_network_u24(len);
        [self.tag.as_u8(), hi, mid, lo]
    }

    /// Decode a header from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidTag`] for an unknown tag byte and
    /// [`FrameError::EmptyBody`] when the length field is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use bidirpc::frame::{FrameError, FrameHeader, Tag};
    ///
    /// let header = FrameHeader::decode([1, 0, 0, 5]).expect("valid header");
    /// assert_eq!((header.tag(), header.len()), (Tag::Yin, 5));
    /// assert_eq!(
    ///     FrameHeader::decode([3, 0, 0, 5]),
    ///     Err(FrameError::InvalidTag(3))
    /// );
    /// ```
    pub fn decode(bytes: [u8; HEADER_SIZE]) -> Result<Self, FrameError> {
        let [tag, hi, mid, lo] = bytes;
        let tag = Tag::try_from(tag)?;
        let len = read_network_u24([hi, mid, lo]) as usize;
        Self::new(tag, len)
    }
}

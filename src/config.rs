//! Session configuration.
//!
//! A session needs to know which side of the symmetric protocol it plays and
//! how many frame buffers to cache. Both have defaults.

use crate::{frame::Tag, pool::DEFAULT_BUFFER_POOL_SIZE};

/// Which sub-channel a peer uses for its outbound calls.
///
/// The two ends of a session must pick opposite roles: a [`Role::Yin`] peer
/// sends requests on [`Tag::Yin`] and serves requests arriving on
/// [`Tag::Yang`]; a [`Role::Yang`] peer does the reverse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client traffic on [`Tag::Yin`], server traffic on [`Tag::Yang`].
    #[default]
    Yin,
    /// Client traffic on [`Tag::Yang`], server traffic on [`Tag::Yin`].
    Yang,
}

impl Role {
    /// Tag carrying this peer's outbound requests and their replies.
    #[must_use]
    pub fn client_tag(self) -> Tag {
        match self {
            Self::Yin => Tag::Yin,
            Self::Yang => Tag::Yang,
        }
    }

    /// Tag carrying the peer's requests to this side and our replies.
    #[must_use]
    pub fn server_tag(self) -> Tag { self.peer().client_tag() }

    /// Role the other end of the connection must use.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Yin => Self::Yang,
            Self::Yang => Self::Yin,
        }
    }
}

impl From<bool> for Role {
    /// `true` selects [`Role::Yin`].
    fn from(yin: bool) -> Self { if yin { Self::Yin } else { Self::Yang } }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yin => f.write_str("yin"),
            Self::Yang => f.write_str("yang"),
        }
    }
}

/// Settings applied when a [`Session`](crate::Session) is created.
///
/// # Examples
///
/// ```
/// use bidirpc::{Role, SessionConfig};
///
/// let config = SessionConfig::new().with_role(Role::Yang).with_buffer_pool_size(32);
/// assert_eq!(config.role(), Role::Yang);
/// assert_eq!(config.buffer_pool_size(), 32);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    role: Role,
    buffer_pool_size: usize,
}

impl SessionConfig {
    /// Configuration with default role and pool size.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set the role of this peer.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the number of cached frame buffers; `0` restores the default.
    #[must_use]
    pub fn with_buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = if size == 0 {
            DEFAULT_BUFFER_POOL_SIZE
        } else {
            size
        };
        self
    }

    /// Configured role.
    #[must_use]
    pub fn role(&self) -> Role { self.role }

    /// Configured buffer pool size.
    #[must_use]
    pub fn buffer_pool_size(&self) -> usize { self.buffer_pool_size }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
        }
    }
}

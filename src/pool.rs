//! Bounded cache of reusable frame buffers.
//!
//! The reader loop takes a buffer for every inbound frame body and the
//! sub-channel write path takes one for every outbound frame. Returning them
//! here amortises allocation across frames. The pool is an optimisation only:
//! a pool that always allocated would behave identically, just slower.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

/// Pool size used when none is configured.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 16;

/// Buffers that grew beyond this capacity are dropped instead of cached so a
/// single oversized frame does not pin its allocation for the session
/// lifetime.
pub const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// Fixed-capacity pool of [`BytesMut`] buffers, safe for concurrent use.
///
/// # Examples
///
/// ```
/// use bidirpc::pool::BufferPool;
///
/// let pool = BufferPool::new(2);
/// let mut buf = pool.get();
/// buf.extend_from_slice(b"frame");
/// pool.put(buf);
///
/// let reused = pool.get();
/// assert!(reused.is_empty());
/// assert!(reused.capacity() >= 5);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool caching at most `capacity` buffers.
    ///
    /// A `capacity` of zero selects [`DEFAULT_BUFFER_POOL_SIZE`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_BUFFER_POOL_SIZE
        } else {
            capacity
        };
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a zero-length buffer, allocating a fresh one when the pool is
    /// empty. Never blocks waiting for a buffer to be returned.
    #[must_use]
    pub fn get(&self) -> BytesMut {
        let mut buf = self.lock().pop().unwrap_or_default();
        buf.clear();
        buf
    }

    /// Return `buf` to the pool, or drop it if the pool is full.
    ///
    /// The caller must not keep any view of `buf` afterwards; ownership makes
    /// that a compile-time guarantee.
    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.lock();
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }

    /// Maximum number of cached buffers.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Number of buffers currently cached.
    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    /// Whether no buffers are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    fn lock(&self) -> MutexGuard<'_, Vec<BytesMut>> {
        // The cached buffers carry no invariants a panicking holder could break.
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BufferPool {
    fn default() -> Self { Self::new(DEFAULT_BUFFER_POOL_SIZE) }
}

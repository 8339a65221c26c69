//! Reusable byte buffers for request heads and responses.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of fixed-capacity buffers.
///
/// Buffers are handed out cleared and return to the pool on drop. At most
/// `max_pooled` idle buffers are retained; extra ones are freed.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    /// Create a pool of buffers with `capacity` bytes each.
    pub fn new(capacity: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                capacity,
                max_pooled,
            }),
        }
    }

    /// Capacity of every buffer.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Take a buffer from the pool, or allocate one.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.inner.idle.lock().ok().and_then(|mut idle| idle.pop());
        let buf = reused.unwrap_or_else(|| Vec::with_capacity(self.inner.capacity));
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A buffer borrowed from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        // Buffers that grew past the pool size are not worth keeping.
        if buf.capacity() > self.pool.capacity * 2 {
            return;
        }
        buf.clear();
        if let Ok(mut idle) = self.pool.idle.lock() {
            if idle.len() < self.pool.max_pooled {
                idle.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused_and_cleared() {
        let pool = BufferPool::new(64, 4);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.idle(), 1);
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_idle_count_is_bounded() {
        let pool = BufferPool::new(16, 2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_oversized_buffers_are_dropped() {
        let pool = BufferPool::new(16, 2);
        {
            let mut buf = pool.acquire();
            buf.resize(1024, 0);
        }
        assert_eq!(pool.idle(), 0);
    }
}

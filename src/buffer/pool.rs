//! Capped free-list of byte buffers.

use std::sync::Mutex;

/// Default capacity of a freshly allocated buffer (32 KiB).
pub const DEFAULT_CAPACITY: usize = 32 * 1024;

/// Largest buffer capacity retained on release (1 MiB).
pub const MAX_CAPACITY: usize = 1024 * 1024;

/// Idle buffers kept around; extra releases are dropped.
const MAX_IDLE: usize = 256;

/// A free-list of `Vec<u8>` buffers shared by all request handlers.
///
/// A buffer handed out by [`BufferPool::get`] belongs to the caller until it
/// is passed back to [`BufferPool::put`]; ownership makes double release
/// impossible.
#[derive(Debug)]
pub struct BufferPool {
    default_capacity: usize,
    max_capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool. Zero arguments fall back to 32 KiB / 1 MiB.
    pub fn new(default_capacity: usize, max_capacity: usize) -> Self {
        let default_capacity = if default_capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            default_capacity
        };
        let max_capacity = if max_capacity == 0 {
            MAX_CAPACITY
        } else {
            max_capacity.max(default_capacity)
        };

        Self {
            default_capacity,
            max_capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take an empty buffer with at least `default_capacity` bytes of room.
    pub fn get(&self) -> Vec<u8> {
        let recycled = self.free.lock().ok().and_then(|mut free| free.pop());
        match recycled {
            Some(buf) => buf,
            None => Vec::with_capacity(self.default_capacity),
        }
    }

    /// Return a buffer. Buffers grown past `max_capacity` are dropped, and so
    /// are buffers smaller than `default_capacity`: a recycled buffer must
    /// still satisfy the capacity [`BufferPool::get`] promises.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_capacity || buf.capacity() < self.default_capacity {
            return;
        }
        buf.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < MAX_IDLE {
                free.push(buf);
            }
        }
    }

    /// Capacity of buffers handed out by [`BufferPool::get`].
    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, MAX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_arguments_use_defaults() {
        let pool = BufferPool::new(0, 0);
        assert_eq!(pool.default_capacity(), DEFAULT_CAPACITY);
        assert_eq!(pool.max_capacity(), MAX_CAPACITY);
    }

    #[test]
    fn get_returns_empty_buffer_with_default_capacity() {
        let pool = BufferPool::new(1024, 4096);
        let buf = pool.get();
        assert_eq!(buf.len(), 0);
        assert!(buf.capacity() >= 1024);
    }

    #[test]
    fn put_resets_length_and_reuses() {
        let pool = BufferPool::new(1024, 4096);
        let mut buf = pool.get();
        buf.extend_from_slice(b"hello");
        pool.put(buf);
        assert_eq!(pool.idle(), 1);

        let again = pool.get();
        assert!(again.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn oversized_buffers_are_dropped() {
        let pool = BufferPool::new(1024, 4096);
        pool.put(Vec::with_capacity(8192));
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn undersized_buffers_are_not_recycled() {
        let pool = BufferPool::new(1024, 4096);
        pool.put(Vec::with_capacity(16));
        assert_eq!(pool.idle(), 0);
        assert!(pool.get().capacity() >= 1024);
    }

    #[test]
    fn get_put_loop_stays_bounded() {
        let pool = BufferPool::new(1024, 4096);
        for _ in 0..10_000 {
            let buf = pool.get();
            pool.put(buf);
        }
        assert!(pool.idle() <= 1);
    }

    #[test]
    fn idle_list_is_capped() {
        let pool = BufferPool::new(16, 64);
        for _ in 0..(MAX_IDLE + 50) {
            pool.put(Vec::with_capacity(32));
        }
        assert_eq!(pool.idle(), MAX_IDLE);
    }

    #[test]
    fn concurrent_get_put() {
        let pool = Arc::new(BufferPool::new(256, 1024));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let mut buf = pool.get();
                        buf.push(i as u8);
                        pool.put(buf);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}

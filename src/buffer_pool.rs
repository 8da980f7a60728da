//! Size-classed scratch buffer pool
//!
//! Read and write paths need transient buffers for staging, compression,
//! and encryption. Rather than allocating per operation, the pool keeps
//! recycled buffers grouped into power-of-two size classes (4 KiB to
//! 1 MiB). Checkout hands out exclusive ownership: the buffer leaves the
//! pool, exactly one caller holds it, and returning it recycles it into
//! its class. Each class evicts least-recently-returned buffers when the
//! pool's total-memory ceiling is exceeded.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Smallest buffer class (4 KiB).
pub const MIN_CLASS_SIZE: usize = 4 * 1024;

/// Largest buffer class (1 MiB). Requests above this allocate directly
/// and are not recycled.
pub const MAX_CLASS_SIZE: usize = 1024 * 1024;

/// Number of power-of-two classes between 4 KiB and 1 MiB inclusive.
const CLASS_COUNT: usize = 9;

/// Buffer pool statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    /// Checkouts served from a recycled buffer
    pub hits: u64,
    /// Checkouts that had to allocate
    pub misses: u64,
    /// Buffers evicted to stay under the memory ceiling
    pub evictions: u64,
    /// Bytes currently held by pooled (idle) buffers
    pub pooled_bytes: usize,
    /// Memory ceiling in bytes
    pub max_bytes: usize,
}

impl BufferPoolStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Idle buffers per class; back = most recently returned.
    classes: [VecDeque<Vec<u8>>; CLASS_COUNT],
    pooled_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Pool of reusable scratch buffers.
#[derive(Debug)]
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    max_bytes: usize,
}

impl BufferPool {
    /// Create a pool with the given total-memory ceiling for idle buffers.
    pub fn new(max_bytes: usize) -> Self {
        BufferPool {
            inner: Mutex::new(PoolInner::default()),
            max_bytes,
        }
    }

    /// Smallest class that fits `size`, or None if it exceeds the largest
    /// class.
    fn class_for(size: usize) -> Option<usize> {
        if size > MAX_CLASS_SIZE {
            return None;
        }
        let mut class_size = MIN_CLASS_SIZE;
        for idx in 0..CLASS_COUNT {
            if size <= class_size {
                return Some(idx);
            }
            class_size *= 2;
        }
        None
    }

    fn class_size(idx: usize) -> usize {
        MIN_CLASS_SIZE << idx
    }

    /// Check out a buffer with at least `size` capacity and zero length.
    /// The caller owns it exclusively until it is returned with
    /// [`BufferPool::checkin`]. Oversized requests allocate directly.
    pub fn checkout(&self, size: usize) -> Vec<u8> {
        let Some(class) = Self::class_for(size) else {
            let mut inner = self.inner.lock();
            inner.misses += 1;
            return Vec::with_capacity(size);
        };

        let mut inner = self.inner.lock();
        if let Some(mut buf) = inner.classes[class].pop_back() {
            inner.pooled_bytes -= buf.capacity();
            inner.hits += 1;
            buf.clear();
            buf
        } else {
            inner.misses += 1;
            Vec::with_capacity(Self::class_size(class))
        }
    }

    /// Return a buffer to the pool. Buffers that fit no class are dropped;
    /// least-recently-returned buffers are evicted if the ceiling is
    /// exceeded.
    pub fn checkin(&self, buf: Vec<u8>) {
        let Some(class) = Self::class_for(buf.capacity()) else {
            return;
        };
        let mut inner = self.inner.lock();
        inner.pooled_bytes += buf.capacity();
        inner.classes[class].push_back(buf);

        while inner.pooled_bytes > self.max_bytes {
            // Evict from the largest class holding idle buffers.
            let Some(victim_class) = (0..CLASS_COUNT)
                .rev()
                .find(|&c| !inner.classes[c].is_empty())
            else {
                break;
            };
            if let Some(evicted) = inner.classes[victim_class].pop_front() {
                inner.pooled_bytes -= evicted.capacity();
                inner.evictions += 1;
            }
        }
    }

    /// Get buffer pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        BufferPoolStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            pooled_bytes: inner.pooled_bytes,
            max_bytes: self.max_bytes,
        }
    }

    /// Drop all idle buffers
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for class in inner.classes.iter_mut() {
            class.clear();
        }
        inner.pooled_bytes = 0;
    }
}

impl Default for BufferPool {
    /// 16 MiB default ceiling.
    fn default() -> Self {
        BufferPool::new(16 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_selection() {
        assert_eq!(BufferPool::class_for(1), Some(0));
        assert_eq!(BufferPool::class_for(4096), Some(0));
        assert_eq!(BufferPool::class_for(4097), Some(1));
        assert_eq!(BufferPool::class_for(MAX_CLASS_SIZE), Some(CLASS_COUNT - 1));
        assert_eq!(BufferPool::class_for(MAX_CLASS_SIZE + 1), None);
    }

    #[test]
    fn test_checkout_miss_then_hit() {
        let pool = BufferPool::default();

        let buf = pool.checkout(8192);
        assert!(buf.capacity() >= 8192);
        assert_eq!(pool.stats().misses, 1);

        pool.checkin(buf);
        let buf2 = pool.checkout(8192);
        assert!(buf2.capacity() >= 8192);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_checkout_is_exclusive() {
        let pool = BufferPool::default();
        let buf = pool.checkout(4096);
        pool.checkin(buf);

        // One pooled buffer: first checkout recycles it, second allocates.
        let _a = pool.checkout(4096);
        let _b = pool.checkout(4096);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.pooled_bytes, 0);
    }

    #[test]
    fn test_returned_buffer_comes_back_empty() {
        let pool = BufferPool::default();
        let mut buf = pool.checkout(4096);
        buf.extend_from_slice(b"stale contents");
        pool.checkin(buf);

        let buf = pool.checkout(4096);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_memory_ceiling_eviction() {
        // Ceiling allows one 4 KiB buffer only.
        let pool = BufferPool::new(4096);
        let a = pool.checkout(4096);
        let b = pool.checkout(4096);
        pool.checkin(a);
        pool.checkin(b);

        let stats = pool.stats();
        assert_eq!(stats.evictions, 1);
        assert!(stats.pooled_bytes <= 4096);
    }

    #[test]
    fn test_oversized_not_pooled() {
        let pool = BufferPool::default();
        let buf = pool.checkout(MAX_CLASS_SIZE + 1);
        assert!(buf.capacity() >= MAX_CLASS_SIZE + 1);
        pool.checkin(buf);
        assert_eq!(pool.stats().pooled_bytes, 0);
    }

    #[test]
    fn test_hit_rate_calculation() {
        let pool = BufferPool::default();
        let buf = pool.checkout(4096); // miss
        pool.checkin(buf);
        let buf = pool.checkout(4096); // hit
        pool.checkin(buf);
        let _ = pool.checkout(4096); // hit

        let stats = pool.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 66.66).abs() < 0.1);
    }

    #[test]
    fn test_clear() {
        let pool = BufferPool::default();
        pool.checkin(pool.checkout(4096));
        pool.checkin(pool.checkout(65536));
        assert!(pool.stats().pooled_bytes > 0);

        pool.clear();
        assert_eq!(pool.stats().pooled_bytes, 0);
    }
}

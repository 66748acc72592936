use crate::constants::{
    BUFFER_POOL_DEFAULT_MAX_IDLE, BUFFER_POOL_MAX_BUCKET_SHIFT, BUFFER_POOL_MIN_BUCKET_SHIFT,
};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of byte buffers for frame messages.
///
/// `acquire` hands out an empty `Vec` whose capacity is at least `capacity`;
/// `release` takes a buffer back once the last `Message` referencing it is
/// dropped. Implementations must be safe to share across threads since
/// messages are released from whichever task drops them last.
pub trait BufferPool: Send + Sync + 'static {
    fn acquire(&self, capacity: usize) -> Vec<u8>;

    fn release(&self, buf: Vec<u8>);
}

pub type SharedBufferPool = Arc<dyn BufferPool>;

static DEFAULT_BUFFER_POOL: Lazy<SharedBufferPool> =
    Lazy::new(|| Arc::new(BucketedBufferPool::new(BUFFER_POOL_DEFAULT_MAX_IDLE)));

/// The process-wide bucketed pool used when no pool is configured.
pub fn default_buffer_pool() -> SharedBufferPool {
    DEFAULT_BUFFER_POOL.clone()
}

/// A pool of power-of-two sized buffers.
///
/// Buffers between 64 bytes and 1 MiB are recycled through per-size free
/// lists, each behind its own lock. Larger requests bypass the pool.
pub struct BucketedBufferPool {
    buckets: Vec<Mutex<Vec<Vec<u8>>>>,
    max_idle_per_bucket: usize,
    allocated: AtomicUsize,
    reused: AtomicUsize,
}

impl BucketedBufferPool {
    pub fn new(max_idle_per_bucket: usize) -> Self {
        let bucket_count = (BUFFER_POOL_MAX_BUCKET_SHIFT - BUFFER_POOL_MIN_BUCKET_SHIFT + 1) as usize;
        Self {
            buckets: (0..bucket_count).map(|_| Mutex::new(Vec::new())).collect(),
            max_idle_per_bucket,
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Index of the smallest bucket able to serve `capacity`.
    fn bucket_for_request(capacity: usize) -> Option<usize> {
        let shift = capacity
            .max(1)
            .checked_next_power_of_two()?
            .trailing_zeros()
            .max(BUFFER_POOL_MIN_BUCKET_SHIFT);
        (shift <= BUFFER_POOL_MAX_BUCKET_SHIFT)
            .then(|| (shift - BUFFER_POOL_MIN_BUCKET_SHIFT) as usize)
    }

    /// Index of the largest bucket whose size `capacity` fully covers.
    fn bucket_for_return(capacity: usize) -> Option<usize> {
        if capacity < (1 << BUFFER_POOL_MIN_BUCKET_SHIFT) {
            return None;
        }
        let shift = usize::BITS - 1 - capacity.leading_zeros();
        (shift <= BUFFER_POOL_MAX_BUCKET_SHIFT)
            .then(|| (shift - BUFFER_POOL_MIN_BUCKET_SHIFT) as usize)
    }

    /// Number of buffers allocated because no idle buffer was available.
    pub fn allocated_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of `acquire` calls served from an idle buffer.
    pub fn reused_count(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    /// Number of idle buffers currently held across all buckets.
    pub fn idle_count(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}

impl Default for BucketedBufferPool {
    fn default() -> Self {
        Self::new(BUFFER_POOL_DEFAULT_MAX_IDLE)
    }
}

impl BufferPool for BucketedBufferPool {
    fn acquire(&self, capacity: usize) -> Vec<u8> {
        let Some(index) = Self::bucket_for_request(capacity) else {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity(capacity);
        };

        let recycled = self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        match recycled {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(1 << (index as u32 + BUFFER_POOL_MIN_BUCKET_SHIFT))
            }
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        let Some(index) = Self::bucket_for_return(buf.capacity()) else {
            return;
        };
        buf.clear();

        let mut bucket = self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if bucket.len() < self.max_idle_per_bucket {
            bucket.push(buf);
        }
    }
}

/// A pool that never recycles: every `acquire` allocates and every `release`
/// frees. It counts both sides so tests can check that each message buffer
/// is released exactly once and nothing is left outstanding.
#[derive(Default)]
pub struct NonRecyclingBufferPool {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl NonRecyclingBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.acquired_count().saturating_sub(self.released_count())
    }
}

impl BufferPool for NonRecyclingBufferPool {
    fn acquire(&self, capacity: usize) -> Vec<u8> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Vec::with_capacity(capacity)
    }

    fn release(&self, buf: Vec<u8>) {
        let released = self.released.fetch_add(1, Ordering::SeqCst) + 1;
        if released > self.acquired.load(Ordering::SeqCst) {
            tracing::error!("buffer released more times than it was acquired");
        }
        drop(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketed_pool_reuses_released_buffers() {
        let pool = BucketedBufferPool::new(4);

        let buf = pool.acquire(100);
        assert!(buf.capacity() >= 100);
        assert_eq!(pool.allocated_count(), 1);

        pool.release(buf);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire(120);
        assert!(again.capacity() >= 120);
        assert!(again.is_empty());
        assert_eq!(pool.reused_count(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn bucketed_pool_caps_idle_buffers() {
        let pool = BucketedBufferPool::new(2);

        let bufs: Vec<_> = (0..5).map(|_| pool.acquire(64)).collect();
        for buf in bufs {
            pool.release(buf);
        }

        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn oversized_requests_bypass_buckets() {
        let pool = BucketedBufferPool::new(4);

        let huge = pool.acquire((1 << BUFFER_POOL_MAX_BUCKET_SHIFT) + 1);
        pool.release(huge);

        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn non_recycling_pool_tracks_outstanding_buffers() {
        let pool = NonRecyclingBufferPool::new();

        let a = pool.acquire(10);
        let b = pool.acquire(10);
        assert_eq!(pool.outstanding(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.acquired_count(), 2);
        assert_eq!(pool.released_count(), 2);
    }
}

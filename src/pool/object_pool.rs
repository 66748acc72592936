use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Types that can be wiped and handed out again by an [`ObjectPool`].
pub trait Recycle {
    /// Returns the value to the state `Default` would produce, keeping
    /// whatever allocations make reuse worthwhile.
    fn recycle(&mut self);
}

/// A bounded free list of reusable bookkeeping objects.
///
/// A pool created with `max_idle == 0` never retains anything, which turns
/// every `get` into a fresh allocation; tests use that to rule out state
/// leaking between uses.
pub struct ObjectPool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    reused: AtomicUsize,
}

impl<T: Default + Recycle> ObjectPool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            reused: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> T {
        let recycled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        match recycled {
            Some(value) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => T::default(),
        }
    }

    pub fn put(&self, mut value: T) {
        value.recycle();

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(value);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn reused_count(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

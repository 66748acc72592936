use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide counter which is initialized at 0.
static GLOBAL_ID_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// Returns a process-unique, non-zero id. Used to tell connections apart.
#[inline]
pub fn increment_u64_id() -> u64 {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

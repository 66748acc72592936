use std::time::Duration;

/// Capacity of each connection's outbound message queue.
///
/// This is a count of queued frames, not bytes. When the queue is full,
/// non-blocking pushes fail with a queue-full error and bounded pushes wait
/// until space frees up or their deadline passes.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 1024;

/// Fixed delay between dial attempts while a client-role connection is
/// reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Largest inbound frame body accepted before the read is treated as a
/// transport failure.
pub const DEFAULT_MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Capacity of the buffered reader wrapped around each connection.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 64;

/// Idle sessions and async handlers each connection keeps for reuse.
pub const DEFAULT_OBJECT_POOL_CAPACITY: usize = 1024;

/// Timeout sentinel meaning "wait without bound".
pub const TIME_FOREVER: Duration = Duration::MAX;

/// Timeout sentinel meaning "do not wait at all".
pub const TIME_ZERO: Duration = Duration::ZERO;

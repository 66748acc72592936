use muxbus::pool::{SharedBufferPool, default_buffer_pool};
use muxbus_rpc_service::constants::{
    DEFAULT_MAX_BODY_LEN, DEFAULT_OBJECT_POOL_CAPACITY, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_RECONNECT_DELAY, DEFAULT_SEND_QUEUE_SIZE,
};
use std::fmt;
use std::time::Duration;

/// Per-connection runtime settings.
#[derive(Clone)]
pub struct RpcClientConfig {
    /// Capacity of the outbound queue, in frames.
    pub send_queue_size: usize,

    /// Delay between dial attempts while reconnecting.
    pub reconnect_delay: Duration,

    /// Inbound frames with a larger body are treated as a read failure.
    pub max_body_len: usize,

    pub read_buffer_size: usize,

    /// Where frame buffers come from and go back to.
    pub buffer_pool: SharedBufferPool,

    /// Idle sessions and async handlers kept for reuse.
    pub object_pool_capacity: usize,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            buffer_pool: default_buffer_pool(),
            object_pool_capacity: DEFAULT_OBJECT_POOL_CAPACITY,
        }
    }
}

impl RpcClientConfig {
    pub fn with_send_queue_size(mut self, send_queue_size: usize) -> Self {
        // tokio's bounded channel rejects a zero capacity.
        self.send_queue_size = send_queue_size.max(1);
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    pub fn with_buffer_pool(mut self, buffer_pool: SharedBufferPool) -> Self {
        self.buffer_pool = buffer_pool;
        self
    }

    pub fn with_object_pool_capacity(mut self, object_pool_capacity: usize) -> Self {
        self.object_pool_capacity = object_pool_capacity;
        self
    }
}

impl fmt::Debug for RpcClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClientConfig")
            .field("send_queue_size", &self.send_queue_size)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_body_len", &self.max_body_len)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("object_pool_capacity", &self.object_pool_capacity)
            .finish_non_exhaustive()
    }
}

mod buffer_pool;
mod object_pool;

pub use buffer_pool::{
    BucketedBufferPool, BufferPool, NonRecyclingBufferPool, SharedBufferPool, default_buffer_pool,
};
pub use object_pool::{ObjectPool, Recycle};

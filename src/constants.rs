// Frame header layout (all integers little-endian)
pub const FRAME_BODY_LENGTH_OFFSET: usize = 0;
pub const FRAME_BODY_LENGTH_SIZE: usize = 4;
pub const FRAME_SEQUENCE_OFFSET: usize = 4;
pub const FRAME_SEQUENCE_SIZE: usize = 8;
pub const FRAME_COMMAND_OFFSET: usize = 12;
pub const FRAME_ASYNC_FLAG_OFFSET: usize = 13;
pub const FRAME_METHOD_LENGTH_OFFSET: usize = 14;

/// Total size of the fixed-length header prefix.
/// Computed as: offset of the method-name length field + its size.
/// Does not include the method name or payload.
pub const FRAME_HEADER_SIZE: usize = FRAME_METHOD_LENGTH_OFFSET + 1; // 14 + 1 = 15

/// The longest method name that fits the 1-byte length field.
pub const FRAME_MAX_METHOD_LENGTH: usize = u8::MAX as usize;

/// Smallest buffer capacity tracked by the bucketed pool (64 bytes).
pub const BUFFER_POOL_MIN_BUCKET_SHIFT: u32 = 6;

/// Largest buffer capacity tracked by the bucketed pool (1 MiB).
/// Anything larger is allocated on demand and freed on release.
pub const BUFFER_POOL_MAX_BUCKET_SHIFT: u32 = 20;

/// Number of idle buffers each bucket keeps before dropping returns.
pub const BUFFER_POOL_DEFAULT_MAX_IDLE: usize = 256;

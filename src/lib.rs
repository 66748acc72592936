//! Wire framing primitives shared by every `muxbus` transport crate.
//!
//! A frame is a fixed 15-byte header followed by the method name and the
//! encoded payload. Frames travel as [`frame::Message`] handles: cheap,
//! reference-counted views over a buffer borrowed from a [`pool::BufferPool`]
//! that is handed back to the pool when the last handle is dropped.

pub mod constants;
pub mod frame;
pub mod pool;
pub mod utils;

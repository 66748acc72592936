use crate::{
    constants::{FRAME_HEADER_SIZE, FRAME_MAX_METHOD_LENGTH},
    frame::{FrameCommand, FrameDecodeError, FrameEncodeError, FrameHeader},
    pool::SharedBufferPool,
};
use std::fmt;
use std::sync::Arc;

/// One complete frame (header + method name + payload) in a pooled buffer.
///
/// `Message` is a shared handle. [`Message::retain`] (or `clone`) adds an
/// owner, [`Message::release`] (or dropping) removes one, and when the last
/// owner goes away the underlying buffer is handed back to the pool it was
/// acquired from. A handle can never observe its buffer after that point,
/// so reuse of released buffers cannot leak into live messages.
///
/// The frame bytes are immutable once the message is built; the same
/// message may sit in several connections' outbound queues at once.
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageBuffer>,
}

struct MessageBuffer {
    header: FrameHeader,
    bytes: Vec<u8>,
    pool: SharedBufferPool,
}

impl Drop for MessageBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.bytes));
    }
}

impl Message {
    /// Builds a frame in a buffer taken from `pool`.
    ///
    /// The body is laid out as `method` followed by `data`.
    pub fn new(
        pool: &SharedBufferPool,
        command: FrameCommand,
        sequence: u64,
        is_async: bool,
        method: &str,
        data: &[u8],
    ) -> Result<Self, FrameEncodeError> {
        if method.len() > FRAME_MAX_METHOD_LENGTH {
            return Err(FrameEncodeError::MethodNameTooLong(method.len()));
        }

        let body_len = method.len() + data.len();
        let body_len_u32 =
            u32::try_from(body_len).map_err(|_| FrameEncodeError::BodyTooLarge(body_len))?;

        let header = FrameHeader {
            body_len: body_len_u32,
            sequence,
            command,
            is_async,
            method_len: method.len() as u8,
        };

        let mut bytes = pool.acquire(FRAME_HEADER_SIZE + body_len);
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(method.as_bytes());
        bytes.extend_from_slice(data);

        Ok(Self::from_parts(header, bytes, pool.clone()))
    }

    /// Wraps a complete frame read off the wire.
    ///
    /// `bytes` should come from `pool`; it is handed back to it on failure
    /// as well as when the message is finally released.
    pub fn decode(pool: &SharedBufferPool, bytes: Vec<u8>) -> Result<Self, FrameDecodeError> {
        match Self::validate(&bytes) {
            Ok(header) => Ok(Self::from_parts(header, bytes, pool.clone())),
            Err(err) => {
                pool.release(bytes);
                Err(err)
            }
        }
    }

    fn validate(bytes: &[u8]) -> Result<FrameHeader, FrameDecodeError> {
        let header = FrameHeader::decode(bytes)?;

        let actual = bytes.len() - FRAME_HEADER_SIZE;
        if actual != header.body_len as usize {
            return Err(FrameDecodeError::BodyLengthMismatch {
                expected: header.body_len as usize,
                actual,
            });
        }

        if header.method_len as usize > actual {
            return Err(FrameDecodeError::CorruptMethodName);
        }

        Ok(header)
    }

    fn from_parts(header: FrameHeader, bytes: Vec<u8>, pool: SharedBufferPool) -> Self {
        Self {
            inner: Arc::new(MessageBuffer {
                header,
                bytes,
                pool,
            }),
        }
    }

    /// Adds an owner. Equivalent to `clone`.
    #[inline]
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Gives up this owner. The buffer returns to its pool once every
    /// retained handle has been released.
    #[inline]
    pub fn release(self) {
        drop(self);
    }

    /// Number of live handles sharing this buffer.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.inner.header
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.inner.header.sequence
    }

    #[inline]
    pub fn command(&self) -> FrameCommand {
        self.inner.header.command
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        self.inner.header.is_async
    }

    /// The complete frame as written to the wire.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Everything after the header: method name, then data.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.inner.bytes[FRAME_HEADER_SIZE..]
    }

    /// The method name. Empty for responses and for names that are not
    /// valid UTF-8.
    pub fn method(&self) -> &str {
        std::str::from_utf8(self.method_bytes()).unwrap_or_default()
    }

    /// The method name as it arrived on the wire.
    #[inline]
    pub fn method_bytes(&self) -> &[u8] {
        let end = FRAME_HEADER_SIZE + self.inner.header.method_len as usize;
        &self.inner.bytes[FRAME_HEADER_SIZE..end]
    }

    /// The encoded payload following the method name.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.inner.bytes[FRAME_HEADER_SIZE + self.inner.header.method_len as usize..]
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.inner.header)
            .field("method", &self.method())
            .field("data_len", &self.data().len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

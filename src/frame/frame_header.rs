use crate::{
    constants::{
        FRAME_ASYNC_FLAG_OFFSET, FRAME_BODY_LENGTH_OFFSET, FRAME_BODY_LENGTH_SIZE,
        FRAME_COMMAND_OFFSET, FRAME_HEADER_SIZE, FRAME_METHOD_LENGTH_OFFSET,
        FRAME_SEQUENCE_OFFSET, FRAME_SEQUENCE_SIZE,
    },
    frame::{FrameCommand, FrameDecodeError},
};

/// The fixed-size prefix of every frame.
///
/// | Field              | Offset | Size |
/// |--------------------|--------|------|
/// | body length        | 0      | 4    |
/// | sequence           | 4      | 8    |
/// | command            | 12     | 1    |
/// | async flag         | 13     | 1    |
/// | method-name length | 14     | 1    |
///
/// The body that follows is the method name followed by the encoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of bytes following the header.
    pub body_len: u32,

    /// Correlation id. Unique per connection while a call is pending;
    /// responses carry the sequence of the request they answer.
    pub sequence: u64,

    pub command: FrameCommand,

    /// `false` for synchronous calls, `true` for async calls and notifications.
    pub is_async: bool,

    /// Length of the method-name prefix of the body.
    pub method_len: u8,
}

impl FrameHeader {
    /// Writes the header into the first `FRAME_HEADER_SIZE` bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than `FRAME_HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[FRAME_BODY_LENGTH_OFFSET..FRAME_SEQUENCE_OFFSET]
            .copy_from_slice(&self.body_len.to_le_bytes());
        buf[FRAME_SEQUENCE_OFFSET..FRAME_COMMAND_OFFSET]
            .copy_from_slice(&self.sequence.to_le_bytes());
        buf[FRAME_COMMAND_OFFSET] = self.command.into();
        buf[FRAME_ASYNC_FLAG_OFFSET] = self.is_async as u8;
        buf[FRAME_METHOD_LENGTH_OFFSET] = self.method_len;
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Parses a header from the start of `buf`.
    ///
    /// Only the header itself is validated here; checking the body against
    /// `body_len` and `method_len` is left to whoever owns the body bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameDecodeError> {
        let header = buf
            .get(..FRAME_HEADER_SIZE)
            .ok_or(FrameDecodeError::IncompleteHeader)?;

        let body_len = header
            .get(FRAME_BODY_LENGTH_OFFSET..FRAME_BODY_LENGTH_OFFSET + FRAME_BODY_LENGTH_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or(FrameDecodeError::IncompleteHeader)?;

        let sequence = header
            .get(FRAME_SEQUENCE_OFFSET..FRAME_SEQUENCE_OFFSET + FRAME_SEQUENCE_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or(FrameDecodeError::IncompleteHeader)?;

        let command_byte = header[FRAME_COMMAND_OFFSET];
        let command = FrameCommand::try_from(command_byte)
            .map_err(|_| FrameDecodeError::UnknownCommand(command_byte))?;

        let is_async = match header[FRAME_ASYNC_FLAG_OFFSET] {
            0 => false,
            1 => true,
            other => return Err(FrameDecodeError::InvalidAsyncFlag(other)),
        };

        Ok(FrameHeader {
            body_len,
            sequence,
            command,
            is_async,
            method_len: header[FRAME_METHOD_LENGTH_OFFSET],
        })
    }

    /// Total frame length (header + body) in bytes.
    #[inline]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body_len as usize
    }
}

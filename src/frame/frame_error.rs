use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEncodeError {
    /// The method name does not fit the 1-byte length field.
    MethodNameTooLong(usize),

    /// The body does not fit the 4-byte length field.
    BodyTooLarge(usize),
}

impl fmt::Display for FrameEncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameEncodeError::MethodNameTooLong(len) => {
                write!(f, "method name of {len} bytes exceeds 255 bytes")
            }
            FrameEncodeError::BodyTooLarge(len) => {
                write!(f, "frame body of {len} bytes exceeds u32::MAX")
            }
        }
    }
}

impl std::error::Error for FrameEncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// Fewer bytes than a full header were supplied.
    IncompleteHeader,

    /// The buffer length disagrees with the body length in the header.
    BodyLengthMismatch { expected: usize, actual: usize },

    /// The command byte is not a known `FrameCommand`.
    UnknownCommand(u8),

    /// The async flag is neither 0 nor 1.
    InvalidAsyncFlag(u8),

    /// The method-name length points past the end of the body.
    CorruptMethodName,

    /// The announced body is larger than the receiver accepts.
    BodyTooLarge { len: usize, max: usize },
}

impl fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDecodeError::IncompleteHeader => write!(f, "incomplete frame header"),
            FrameDecodeError::BodyLengthMismatch { expected, actual } => write!(
                f,
                "frame body length mismatch: header says {expected}, got {actual}"
            ),
            FrameDecodeError::UnknownCommand(byte) => write!(f, "unknown frame command {byte}"),
            FrameDecodeError::InvalidAsyncFlag(byte) => write!(f, "invalid async flag {byte}"),
            FrameDecodeError::CorruptMethodName => write!(f, "corrupt method name"),
            FrameDecodeError::BodyTooLarge { len, max } => {
                write!(f, "frame body of {len} bytes exceeds limit of {max} bytes")
            }
        }
    }
}

impl std::error::Error for FrameDecodeError {}

use muxbus::frame::FrameEncodeError;
use muxbus_rpc_service::RpcCodecError;
use std::fmt;
use std::io;

/// Errors returned to callers of the connection runtime.
#[derive(Debug)]
pub enum RpcClientError {
    /// The runtime has been stopped.
    Stopped,
    /// The connection is being re-dialed; retry later.
    Reconnecting,
    /// The enqueue or response deadline passed.
    Timeout,
    /// A non-blocking push found the outbound queue full; retry later.
    QueueIsFull,
    /// A synchronous call was asked not to wait for its response.
    InvalidTimeout,
    /// The peer answered with an error frame carrying this text.
    Remote(String),
    /// Encoding the request or binding the response failed.
    Codec(RpcCodecError),
    /// The request could not be framed.
    Encode(FrameEncodeError),
    /// A transport-level I/O error.
    Io(io::Error),
}

impl RpcClientError {
    /// `true` for conditions that clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcClientError::QueueIsFull | RpcClientError::Reconnecting
        )
    }
}

impl fmt::Display for RpcClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcClientError::Stopped => write!(f, "client stopped"),
            RpcClientError::Reconnecting => write!(f, "client reconnecting"),
            RpcClientError::Timeout => write!(f, "timeout"),
            RpcClientError::QueueIsFull => write!(f, "send queue is full"),
            RpcClientError::InvalidTimeout => {
                write!(f, "a synchronous call requires a bounded or unbounded timeout")
            }
            RpcClientError::Remote(msg) => write!(f, "{}", msg),
            RpcClientError::Codec(e) => write!(f, "codec error: {}", e),
            RpcClientError::Encode(e) => write!(f, "frame encode error: {}", e),
            RpcClientError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RpcClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcClientError::Codec(e) => Some(e),
            RpcClientError::Encode(e) => Some(e),
            RpcClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RpcClientError {
    fn from(e: io::Error) -> Self {
        RpcClientError::Io(e)
    }
}

impl From<RpcCodecError> for RpcClientError {
    fn from(e: RpcCodecError) -> Self {
        RpcClientError::Codec(e)
    }
}

impl From<FrameEncodeError> for RpcClientError {
    fn from(e: FrameEncodeError) -> Self {
        RpcClientError::Encode(e)
    }
}

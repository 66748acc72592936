use muxbus_rpc_service_endpoint::RpcServiceEndpointError;
use muxbus_tokio_rpc_client::RpcClientError;
use std::fmt;

const INVALID_PASSWORD: &str = "invalid password";
const INVALID_TOPIC_EMPTY: &str = "invalid topic: empty";
const UNAUTHENTICATED: &str = "unauthenticated";
const INVALID_TOPIC_BYTES: &str = "invalid topic bytes";

#[derive(Debug)]
pub enum PubSubError {
    /// The shared secret did not match.
    InvalidPassword,
    /// A topic name was empty.
    InvalidTopicEmpty,
    /// The connection has not authenticated yet.
    Unauthenticated,
    /// A topic envelope was truncated or its name was not UTF-8.
    InvalidTopicBytes,
    /// The name does not fit the envelope's length prefix.
    TopicNameTooLong(usize),
    /// Installing the pub/sub routes failed.
    Endpoint(RpcServiceEndpointError),
    /// The underlying call failed.
    Client(RpcClientError),
}

impl fmt::Display for PubSubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PubSubError::InvalidPassword => f.write_str(INVALID_PASSWORD),
            PubSubError::InvalidTopicEmpty => f.write_str(INVALID_TOPIC_EMPTY),
            PubSubError::Unauthenticated => f.write_str(UNAUTHENTICATED),
            PubSubError::InvalidTopicBytes => f.write_str(INVALID_TOPIC_BYTES),
            PubSubError::TopicNameTooLong(len) => {
                write!(f, "topic name too long: {} bytes", len)
            }
            PubSubError::Endpoint(e) => write!(f, "endpoint error: {}", e),
            PubSubError::Client(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PubSubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PubSubError::Endpoint(e) => Some(e),
            PubSubError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcServiceEndpointError> for PubSubError {
    fn from(e: RpcServiceEndpointError) -> Self {
        PubSubError::Endpoint(e)
    }
}

/// Error responses from a pub/sub server carry the `Display` text of the
/// server-side error; known texts map back to their variant.
impl From<RpcClientError> for PubSubError {
    fn from(e: RpcClientError) -> Self {
        match e {
            RpcClientError::Remote(text) => match text.as_str() {
                INVALID_PASSWORD => PubSubError::InvalidPassword,
                INVALID_TOPIC_EMPTY => PubSubError::InvalidTopicEmpty,
                UNAUTHENTICATED => PubSubError::Unauthenticated,
                INVALID_TOPIC_BYTES => PubSubError::InvalidTopicBytes,
                _ => PubSubError::Client(RpcClientError::Remote(text)),
            },
            other => PubSubError::Client(other),
        }
    }
}

use muxbus_tokio_rpc_client::RpcClientError;
use std::fmt;

#[derive(Debug)]
pub enum RpcServiceEndpointError {
    /// A handler is already registered under this method name.
    DuplicateMethod(String),
    /// Writing the response back to the caller failed.
    Respond(RpcClientError),
}

impl fmt::Display for RpcServiceEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcServiceEndpointError::DuplicateMethod(method) => {
                write!(f, "a handler for method '{}' is already registered", method)
            }
            RpcServiceEndpointError::Respond(e) => write!(f, "failed to respond: {}", e),
        }
    }
}

impl std::error::Error for RpcServiceEndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcServiceEndpointError::Respond(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcClientError> for RpcServiceEndpointError {
    fn from(err: RpcClientError) -> Self {
        RpcServiceEndpointError::Respond(err)
    }
}

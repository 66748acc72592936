use crate::error::RpcClientError;
use muxbus::frame::{FrameCommand, Message};
use muxbus_rpc_service::FromRpcBody;

/// A response frame delivered to a caller.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    message: Message,
}

/// Invoked at most once with the response to an asynchronous call.
pub type RpcResponseCallback = Box<dyn FnOnce(RpcResponse) + Send + 'static>;

impl RpcResponse {
    pub(crate) fn new(message: Message) -> Self {
        Self { message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn sequence(&self) -> u64 {
        self.message.sequence()
    }

    /// `true` if the peer answered with an error frame.
    pub fn is_error(&self) -> bool {
        self.message.command() == FrameCommand::Error
    }

    /// Binds the payload to `T`, or turns an error frame into
    /// [`RpcClientError::Remote`].
    pub fn bind<T: FromRpcBody>(&self) -> Result<T, RpcClientError> {
        if self.is_error() {
            return Err(RpcClientError::Remote(
                String::from_utf8_lossy(self.message.data()).into_owned(),
            ));
        }
        Ok(T::from_rpc_body(self.message.data())?)
    }
}

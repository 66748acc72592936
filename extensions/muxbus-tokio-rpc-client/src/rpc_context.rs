use crate::{error::RpcClientError, rpc_client::RpcClient};
use muxbus::frame::{FrameCommand, Message};
use muxbus_rpc_service::{FromRpcBody, RpcCodecError, RpcTimeout, ToRpcBody};
use std::fmt;

/// One inbound request together with the connection it arrived on.
#[derive(Clone)]
pub struct RpcContext {
    client: RpcClient,
    request: Message,
}

impl RpcContext {
    pub fn new(client: RpcClient, request: Message) -> Self {
        Self { client, request }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    pub fn method(&self) -> &str {
        self.request.method()
    }

    /// The encoded payload.
    pub fn body(&self) -> &[u8] {
        self.request.data()
    }

    /// `true` for one-way notifications, which are never answered.
    pub fn is_notify(&self) -> bool {
        self.request.command() == FrameCommand::Notify
    }

    pub fn bind<T: FromRpcBody>(&self) -> Result<T, RpcCodecError> {
        T::from_rpc_body(self.body())
    }

    /// Answers the request with a success response.
    pub async fn write<T: ToRpcBody + ?Sized>(&self, value: &T) -> Result<(), RpcClientError> {
        let body = value.to_rpc_body()?;
        self.respond(FrameCommand::Response, &body).await
    }

    /// Answers the request with an error response carrying `err` as text.
    pub async fn error(&self, err: impl fmt::Display) -> Result<(), RpcClientError> {
        self.respond(FrameCommand::Error, err.to_string().as_bytes())
            .await
    }

    async fn respond(&self, command: FrameCommand, data: &[u8]) -> Result<(), RpcClientError> {
        if self.is_notify() {
            return Ok(());
        }

        let response = Message::new(
            self.client.buffer_pool(),
            command,
            self.request.sequence(),
            self.request.is_async(),
            "",
            data,
        )?;
        self.client.push_message(response, RpcTimeout::Forever).await
    }
}

impl fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcContext")
            .field("client_id", &self.client.id())
            .field("request", &self.request)
            .finish()
    }
}

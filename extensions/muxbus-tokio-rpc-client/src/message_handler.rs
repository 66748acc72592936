use crate::{rpc_client::RpcClient, rpc_context::RpcContext};
use muxbus::frame::Message;

/// Decides what happens to each frame the receive loop reads.
///
/// The default `on_message` routes responses and error frames back to the
/// client's correlation tables and hands requests and notifications to
/// `on_request`. Handlers run inline on the receive loop, so they see
/// requests in arrival order and must not wait on calls over the same
/// connection.
#[async_trait::async_trait]
pub trait RpcMessageHandler: Send + Sync + 'static {
    async fn on_request(&self, ctx: RpcContext);

    async fn on_message(&self, client: &RpcClient, message: Message) {
        if message.command().is_inbound_call() {
            self.on_request(RpcContext::new(client.clone(), message))
                .await
        } else {
            client.handle_response(message)
        }
    }
}

/// A handler for connections that only make calls.
///
/// Inbound requests are refused with an error response; notifications are
/// dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessageHandler;

#[async_trait::async_trait]
impl RpcMessageHandler for NoopMessageHandler {
    async fn on_request(&self, ctx: RpcContext) {
        let method = String::from_utf8_lossy(ctx.request().method_bytes());
        tracing::debug!(
            client_id = ctx.client().id(),
            method = %method,
            "no request handler installed"
        );
        if let Err(err) = ctx.error(format!("method not found: {method}")).await {
            tracing::debug!(error = %err, "failed to refuse request");
        }
    }
}

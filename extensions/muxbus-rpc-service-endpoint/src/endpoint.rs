use crate::error::RpcServiceEndpointError;
use futures::FutureExt;
use futures::future::BoxFuture;
use muxbus::utils::panic_message;
use muxbus_tokio_rpc_client::{RpcContext, RpcMessageHandler};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type RpcHandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type RpcMethodHandler =
    Arc<dyn Fn(RpcContext) -> BoxFuture<'static, Result<Vec<u8>, RpcHandlerError>> + Send + Sync>;

/// Routes inbound requests to handlers by method name.
///
/// A handler's `Ok` bytes become the response body and its `Err` becomes an
/// error response carrying the error's text. Requests for unknown methods
/// and handlers that panic are answered with an error too, so a misbehaving
/// handler only ever affects its own caller. Notifications are dispatched
/// the same way but never answered.
#[derive(Default)]
pub struct RpcServiceEndpoint {
    handlers: RwLock<HashMap<String, RpcMethodHandler>>,
}

impl RpcServiceEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F, Fut>(
        &self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcServiceEndpointError>
    where
        F: Fn(RpcContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, RpcHandlerError>> + Send + 'static,
    {
        let method = method.into();
        match self.handlers.write().await.entry(method) {
            Entry::Occupied(entry) => Err(RpcServiceEndpointError::DuplicateMethod(
                entry.key().clone(),
            )),
            Entry::Vacant(entry) => {
                let wrapped: RpcMethodHandler = Arc::new(move |ctx: RpcContext| handler(ctx).boxed());
                entry.insert(wrapped);
                Ok(())
            }
        }
    }

    /// Removes a handler. Returns whether one was registered.
    pub async fn unregister(&self, method: &str) -> bool {
        self.handlers.write().await.remove(method).is_some()
    }

    pub async fn is_registered(&self, method: &str) -> bool {
        self.handlers.read().await.contains_key(method)
    }

    /// Runs the handler for `ctx` and answers the caller.
    pub async fn dispatch(&self, ctx: RpcContext) -> Result<(), RpcServiceEndpointError> {
        let method = ctx.request().method_bytes();
        let handler = match std::str::from_utf8(method) {
            Ok(name) => self.handlers.read().await.get(name).cloned(),
            Err(_) => None,
        };
        let Some(handler) = handler else {
            let name = String::from_utf8_lossy(method);
            tracing::warn!(
                client_id = ctx.client().id(),
                method = %name,
                "method not found"
            );
            ctx.error(format!("method not found: {name}")).await?;
            return Ok(());
        };

        match AssertUnwindSafe(handler(ctx.clone())).catch_unwind().await {
            Ok(Ok(body)) => ctx.write(&body).await?,
            Ok(Err(err)) => {
                tracing::debug!(
                    client_id = ctx.client().id(),
                    method = ctx.method(),
                    error = %err,
                    "handler returned an error"
                );
                ctx.error(err).await?
            }
            Err(panic) => {
                let reason = panic_message(&*panic).to_owned();
                tracing::error!(
                    client_id = ctx.client().id(),
                    method = ctx.method(),
                    "handler panicked: {}",
                    reason
                );
                ctx.error(format!("handler panicked: {}", reason)).await?
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RpcMessageHandler for RpcServiceEndpoint {
    async fn on_request(&self, ctx: RpcContext) {
        let client_id = ctx.client().id();
        if let Err(err) = self.dispatch(ctx).await {
            tracing::debug!(client_id, error = %err, "dispatch failed");
        }
    }
}

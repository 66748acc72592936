use crate::{
    constants::{
        DEFAULT_PUBSUB_CALL_TIMEOUT, ROUTE_AUTHENTICATE, ROUTE_PUBLISH, ROUTE_PUBLISH_TO_ONE,
        ROUTE_SUBSCRIBE, ROUTE_UNSUBSCRIBE,
    },
    error::PubSubError,
    topic::Topic,
};
use bytes::Bytes;
use muxbus_rpc_service_endpoint::{RpcHandlerError, RpcServiceEndpoint};
use muxbus_tokio_rpc_client::{
    RpcClient, RpcClientConfig, RpcClientError, RpcContext, RpcDialer, tcp_dialer,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Receives the topics pushed for one subscription.
pub type TopicHandler = Arc<dyn Fn(Topic) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PubSubClientConfig {
    /// Shared secret presented on authentication.
    pub password: String,
    /// Bound on each pub/sub call. Must be non-zero.
    pub call_timeout: Duration,
    pub rpc: RpcClientConfig,
}

impl PubSubClientConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            call_timeout: DEFAULT_PUBSUB_CALL_TIMEOUT,
            rpc: RpcClientConfig::default(),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_rpc_config(mut self, rpc: RpcClientConfig) -> Self {
        self.rpc = rpc;
        self
    }
}

struct Subscriptions {
    password: String,
    call_timeout: Duration,
    handlers: Mutex<HashMap<String, TopicHandler>>,
}

impl Subscriptions {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, ctx: &RpcContext) -> Result<(), PubSubError> {
        let topic = Topic::from_bytes(ctx.body())?;
        let handler = self.lock().get(topic.name()).cloned();
        match handler {
            Some(handler) => handler(topic),
            None => tracing::debug!(topic = topic.name(), "push for a topic with no handler"),
        }
        Ok(())
    }

    /// Re-establishes authentication and every subscription on a fresh
    /// connection.
    async fn restore(&self, client: &RpcClient) {
        if let Err(err) = authenticate(client, &self.password, self.call_timeout).await {
            tracing::warn!(client_id = client.id(), error = %err, "re-authentication failed");
            return;
        }

        let names: Vec<String> = self.lock().keys().cloned().collect();
        for name in names {
            let result = match Topic::new(name.as_str(), Bytes::new()) {
                Ok(topic) => client
                    .call::<_, ()>(ROUTE_SUBSCRIBE, &topic, self.call_timeout)
                    .await
                    .map_err(PubSubError::from),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                tracing::warn!(
                    client_id = client.id(),
                    topic = %name,
                    error = %err,
                    "re-subscribe failed"
                );
            }
        }
        tracing::info!(client_id = client.id(), "pub/sub session restored");
    }
}

async fn authenticate(
    client: &RpcClient,
    password: &str,
    timeout: Duration,
) -> Result<(), PubSubError> {
    client
        .call::<str, ()>(ROUTE_AUTHENTICATE, password, timeout)
        .await?;
    Ok(())
}

/// A connection to a [`crate::PubSubServer`].
///
/// After a reconnect the client authenticates again and re-subscribes to
/// every topic it still has a handler for.
#[derive(Clone)]
pub struct PubSubClient {
    client: RpcClient,
    subscriptions: Arc<Subscriptions>,
}

impl PubSubClient {
    /// Dials `addr` over TCP. Call [`PubSubClient::authenticate`] before
    /// anything else.
    pub async fn connect(
        addr: impl Into<String>,
        config: PubSubClientConfig,
    ) -> Result<Self, PubSubError> {
        let addr = addr.into();
        Self::connect_with(tcp_dialer(addr.clone()), addr, config).await
    }

    pub async fn connect_with(
        dialer: RpcDialer,
        peer: impl Into<String>,
        config: PubSubClientConfig,
    ) -> Result<Self, PubSubError> {
        let subscriptions = Arc::new(Subscriptions {
            password: config.password,
            call_timeout: config.call_timeout,
            handlers: Mutex::new(HashMap::new()),
        });

        let endpoint = Arc::new(RpcServiceEndpoint::new());
        let subs = subscriptions.clone();
        endpoint
            .register(ROUTE_PUBLISH, move |ctx: RpcContext| {
                let subs = subs.clone();
                async move {
                    subs.deliver(&ctx)?;
                    Ok::<_, RpcHandlerError>(Vec::new())
                }
            })
            .await?;

        let client = RpcClient::connect_with(dialer, peer, endpoint, config.rpc)
            .await
            .map_err(RpcClientError::Io)?;

        let subs = subscriptions.clone();
        client.on_connected(move |client| {
            let client = client.clone();
            let subs = subs.clone();
            tokio::spawn(async move { subs.restore(&client).await });
        });
        client.run();

        Ok(Self {
            client,
            subscriptions,
        })
    }

    pub fn rpc_client(&self) -> &RpcClient {
        &self.client
    }

    pub async fn authenticate(&self) -> Result<(), PubSubError> {
        let subs = &self.subscriptions;
        authenticate(&self.client, &subs.password, subs.call_timeout).await
    }

    /// Subscribes to `name`, routing its pushes to `handler`.
    ///
    /// Subscribing again replaces the handler; the server keeps a single
    /// membership either way.
    pub async fn subscribe(
        &self,
        name: &str,
        handler: impl Fn(Topic) + Send + Sync + 'static,
    ) -> Result<(), PubSubError> {
        let topic = Topic::new(name, Bytes::new())?;
        let previous = self
            .subscriptions
            .lock()
            .insert(name.to_owned(), Arc::new(handler));

        if let Err(err) = self.call(ROUTE_SUBSCRIBE, &topic).await {
            let mut handlers = self.subscriptions.lock();
            match previous {
                Some(previous) => {
                    handlers.insert(name.to_owned(), previous);
                }
                None => {
                    handlers.remove(name);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, name: &str) -> Result<(), PubSubError> {
        let topic = Topic::new(name, Bytes::new())?;
        self.subscriptions.lock().remove(name);
        self.call(ROUTE_UNSUBSCRIBE, &topic).await
    }

    /// Publishes to every other subscriber of `name`.
    pub async fn publish(&self, name: &str, payload: impl Into<Bytes>) -> Result<(), PubSubError> {
        let topic = Topic::new(name, payload)?;
        self.call(ROUTE_PUBLISH, &topic).await
    }

    /// Publishes to one other subscriber of `name`.
    pub async fn publish_to_one(
        &self,
        name: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), PubSubError> {
        let topic = Topic::new(name, payload)?;
        self.call(ROUTE_PUBLISH_TO_ONE, &topic).await
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.lock().contains_key(name)
    }

    pub fn stop(&self) {
        self.client.stop();
    }

    async fn call(&self, route: &str, topic: &Topic) -> Result<(), PubSubError> {
        self.client
            .call::<Topic, ()>(route, topic, self.subscriptions.call_timeout)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubClient")
            .field("client", &self.client)
            .field("topics", &self.subscriptions.lock().len())
            .finish()
    }
}

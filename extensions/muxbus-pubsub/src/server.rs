use crate::{
    client_topics::ClientTopics,
    constants::{
        ROUTE_AUTHENTICATE, ROUTE_PUBLISH, ROUTE_PUBLISH_TO_ONE, ROUTE_SUBSCRIBE,
        ROUTE_UNSUBSCRIBE,
    },
    error::PubSubError,
    registry::TopicRegistry,
    topic::Topic,
};
use bytes::Bytes;
use muxbus_rpc_service_endpoint::RpcHandlerError;
use muxbus_tokio_rpc_client::{RpcClient, RpcClientConfig, RpcContext};
use muxbus_tokio_rpc_server::RpcServer;
use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

/// An [`RpcServer`] serving the pub/sub routes.
///
/// Connections must authenticate with the shared secret before any other
/// route is honored.
pub struct PubSubServer {
    server: Arc<RpcServer>,
    registry: Arc<TopicRegistry>,
}

impl PubSubServer {
    pub async fn new(password: impl Into<String>) -> Result<Self, PubSubError> {
        Self::with_config(password, RpcClientConfig::default()).await
    }

    pub async fn with_config(
        password: impl Into<String>,
        config: RpcClientConfig,
    ) -> Result<Self, PubSubError> {
        let server = Arc::new(RpcServer::with_config(config));
        let registry = Arc::new(TopicRegistry::new());
        let password: String = password.into();
        let password: Arc<str> = password.into();
        let endpoint = server.endpoint();

        endpoint
            .register(ROUTE_AUTHENTICATE, move |ctx: RpcContext| {
                let password = password.clone();
                async move { on_authenticate(&ctx, &password) }
            })
            .await?;

        let topics = registry.clone();
        endpoint
            .register(ROUTE_SUBSCRIBE, move |ctx: RpcContext| {
                let topics = topics.clone();
                async move { on_subscribe(&ctx, &topics) }
            })
            .await?;

        endpoint
            .register(ROUTE_UNSUBSCRIBE, |ctx: RpcContext| async move {
                on_unsubscribe(&ctx)
            })
            .await?;

        let topics = registry.clone();
        endpoint
            .register(ROUTE_PUBLISH, move |ctx: RpcContext| {
                let topics = topics.clone();
                async move { on_publish(&ctx, &topics, false).await }
            })
            .await?;

        let topics = registry.clone();
        endpoint
            .register(ROUTE_PUBLISH_TO_ONE, move |ctx: RpcContext| {
                let topics = topics.clone();
                async move { on_publish(&ctx, &topics, true).await }
            })
            .await?;

        server.on_disconnected(remove_client);

        Ok(Self { server, registry })
    }

    /// The transport server. Its disconnect hook is taken by pub/sub
    /// cleanup and must not be replaced.
    pub fn rpc_server(&self) -> Arc<RpcServer> {
        self.server.clone()
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub async fn serve<A: ToSocketAddrs>(&self, addr: A) -> io::Result<()> {
        self.server.clone().serve(addr).await
    }

    pub async fn serve_with_listener(&self, listener: TcpListener) -> io::Result<()> {
        self.server.clone().serve_with_listener(listener).await
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Pushes to every subscriber of `name`. Returns how many accepted it.
    pub async fn publish(
        &self,
        name: &str,
        payload: impl Into<Bytes>,
    ) -> Result<usize, PubSubError> {
        let topic = Topic::new(name, payload)?;
        self.registry
            .get_or_make(topic.name())
            .publish(None, &topic)
            .await
    }

    /// Pushes to one subscriber of `name`. Returns whether one accepted it.
    pub async fn publish_to_one(
        &self,
        name: &str,
        payload: impl Into<Bytes>,
    ) -> Result<bool, PubSubError> {
        let topic = Topic::new(name, payload)?;
        self.registry
            .get_or_make(topic.name())
            .publish_to_one(None, &topic)
            .await
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.registry.get(name).map_or(0, |agent| agent.len())
    }
}

fn authenticated(ctx: &RpcContext) -> Result<Arc<ClientTopics>, PubSubError> {
    ctx.client()
        .user_data::<ClientTopics>()
        .ok_or(PubSubError::Unauthenticated)
}

/// Parses the envelope and rejects an empty name.
fn named_topic(ctx: &RpcContext) -> Result<Topic, PubSubError> {
    let topic = Topic::from_bytes(ctx.body())?;
    if topic.name().is_empty() {
        return Err(PubSubError::InvalidTopicEmpty);
    }
    Ok(topic)
}

fn subscription(ctx: &RpcContext) -> Result<(Arc<ClientTopics>, Topic), PubSubError> {
    Ok((authenticated(ctx)?, named_topic(ctx)?))
}

fn rejected(ctx: &RpcContext, err: PubSubError) -> RpcHandlerError {
    tracing::warn!(
        client_id = ctx.client().id(),
        peer = ctx.client().peer(),
        method = ctx.method(),
        error = %err,
        "pub/sub request rejected"
    );
    err.into()
}

fn on_authenticate(ctx: &RpcContext, password: &str) -> Result<Vec<u8>, RpcHandlerError> {
    let presented = ctx.bind::<String>()?;
    if presented != password {
        return Err(rejected(ctx, PubSubError::InvalidPassword));
    }

    let client = ctx.client();
    // Re-authenticating keeps existing subscriptions.
    if client.user_data::<ClientTopics>().is_none() {
        client.set_user_data(ClientTopics::default());
    }
    tracing::info!(client_id = client.id(), peer = client.peer(), "authenticated");
    Ok(Vec::new())
}

fn on_subscribe(ctx: &RpcContext, registry: &TopicRegistry) -> Result<Vec<u8>, RpcHandlerError> {
    let (topics, topic) = match subscription(ctx) {
        Ok(parsed) => parsed,
        Err(err) => return Err(rejected(ctx, err)),
    };

    let client = ctx.client();
    let agent = registry.get_or_make(topic.name());
    if !topics.insert(topic.name(), agent.clone()) {
        return Ok(Vec::new());
    }
    agent.add(client);

    // Disconnect cleanup may already have run.
    if !client.is_running() {
        agent.delete(client.id());
        topics.remove(topic.name());
        return Ok(Vec::new());
    }

    tracing::info!(
        client_id = client.id(),
        topic = topic.name(),
        "subscribed"
    );
    Ok(Vec::new())
}

fn on_unsubscribe(ctx: &RpcContext) -> Result<Vec<u8>, RpcHandlerError> {
    let (topics, topic) = match subscription(ctx) {
        Ok(parsed) => parsed,
        Err(err) => return Err(rejected(ctx, err)),
    };

    if let Some(agent) = topics.remove(topic.name()) {
        agent.delete(ctx.client().id());
        tracing::info!(
            client_id = ctx.client().id(),
            topic = topic.name(),
            "unsubscribed"
        );
    }
    Ok(Vec::new())
}

async fn on_publish(
    ctx: &RpcContext,
    registry: &TopicRegistry,
    to_one: bool,
) -> Result<Vec<u8>, RpcHandlerError> {
    let topic = match authenticated(ctx).and_then(|_| named_topic(ctx)) {
        Ok(topic) => topic,
        Err(err) => return Err(rejected(ctx, err)),
    };

    let agent = registry.get_or_make(topic.name());
    let origin = Some(ctx.client().id());
    if to_one {
        agent.publish_to_one(origin, &topic).await?;
    } else {
        agent.publish(origin, &topic).await?;
    }
    Ok(Vec::new())
}

fn remove_client(client: &RpcClient) {
    let Some(topics) = client.user_data::<ClientTopics>() else {
        return;
    };
    for agent in topics.drain() {
        agent.delete(client.id());
        tracing::info!(
            client_id = client.id(),
            topic = agent.name(),
            "unsubscribed on disconnect"
        );
    }
    client.clear_user_data();
}

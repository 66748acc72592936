use crate::{constants::ROUTE_PUBLISH, error::PubSubError, topic::Topic};
use muxbus::frame::{FrameCommand, Message};
use muxbus_rpc_service::RpcTimeout;
use muxbus_tokio_rpc_client::RpcClient;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

/// The connections subscribed to one topic.
///
/// Members are keyed by connection id. The membership lock is only held
/// long enough to snapshot or mutate the set, never across a send.
pub struct TopicAgent {
    name: String,
    clients: RwLock<HashMap<u64, RpcClient>>,
}

impl TopicAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `false` if the connection was already a member.
    pub fn add(&self, client: &RpcClient) -> bool {
        self.write_clients()
            .insert(client.id(), client.clone())
            .is_none()
    }

    /// Returns `false` if the connection was not a member.
    pub fn delete(&self, client_id: u64) -> bool {
        self.write_clients().remove(&client_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_clients().is_empty()
    }

    /// Pushes `topic` to every member except `exclude`.
    ///
    /// Each push is non-blocking; members whose queue is full or that are
    /// going away are skipped. Returns how many members accepted it.
    pub async fn publish(&self, exclude: Option<u64>, topic: &Topic) -> Result<usize, PubSubError> {
        let targets = self.members_except(exclude);
        let Some(first) = targets.first() else {
            return Ok(0);
        };
        let message = build_push(first, topic)?;

        let mut delivered = 0;
        for client in &targets {
            if push(client, message.retain(), &self.name).await {
                delivered += 1;
            }
        }
        tracing::trace!(topic = %self.name, delivered, "published");
        Ok(delivered)
    }

    /// Pushes `topic` to one randomly chosen member other than `exclude`,
    /// moving on to another member if the chosen one does not accept it.
    ///
    /// Returns `false` if no member took it.
    pub async fn publish_to_one(
        &self,
        exclude: Option<u64>,
        topic: &Topic,
    ) -> Result<bool, PubSubError> {
        let mut targets = self.members_except(exclude);
        let Some(first) = targets.first() else {
            return Ok(false);
        };
        let message = build_push(first, topic)?;

        targets.shuffle(&mut rand::rng());
        for client in &targets {
            if push(client, message.retain(), &self.name).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn members_except(&self, exclude: Option<u64>) -> Vec<RpcClient> {
        self.read_clients()
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(_, client)| client.clone())
            .collect()
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<u64, RpcClient>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<u64, RpcClient>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One frame shared by every recipient.
fn build_push(client: &RpcClient, topic: &Topic) -> Result<Message, PubSubError> {
    Message::new(
        client.buffer_pool(),
        FrameCommand::Notify,
        0,
        true,
        ROUTE_PUBLISH,
        &topic.to_bytes(),
    )
    .map_err(|e| PubSubError::Client(e.into()))
}

async fn push(client: &RpcClient, message: Message, topic: &str) -> bool {
    match client.push_message(message, RpcTimeout::NonBlocking).await {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(
                client_id = client.id(),
                topic,
                error = %err,
                "dropped topic push"
            );
            false
        }
    }
}

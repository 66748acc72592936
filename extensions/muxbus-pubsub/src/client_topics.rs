use crate::topic_agent::TopicAgent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The topics one server-side connection is subscribed to.
///
/// Attached to the connection as user data when it authenticates; its
/// presence is what marks the connection as authenticated.
#[derive(Default)]
pub struct ClientTopics {
    topics: Mutex<HashMap<String, Arc<TopicAgent>>>,
}

impl ClientTopics {
    /// Returns `false` if the topic was already recorded.
    pub fn insert(&self, name: &str, agent: Arc<TopicAgent>) -> bool {
        let mut topics = self.lock();
        if topics.contains_key(name) {
            return false;
        }
        topics.insert(name.to_owned(), agent);
        true
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TopicAgent>> {
        self.lock().remove(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the set, handing back the agents that were in it.
    pub fn drain(&self) -> Vec<Arc<TopicAgent>> {
        self.lock().drain().map(|(_, agent)| agent).collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<TopicAgent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

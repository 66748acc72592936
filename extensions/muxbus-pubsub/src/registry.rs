use crate::topic_agent::TopicAgent;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Topic name to [`TopicAgent`]. Agents are created on first use and kept
/// for the life of the registry.
#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<TopicAgent>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TopicAgent>> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn get_or_make(&self, name: &str) -> Arc<TopicAgent> {
        if let Some(agent) = self.get(name) {
            return agent;
        }

        // Re-check under the write lock; another caller may have won.
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_owned())
            .or_insert_with(|| {
                tracing::debug!(topic = name, "topic created");
                Arc::new(TopicAgent::new(name))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use std::time::Duration;

pub const ROUTE_AUTHENTICATE: &str = "/pubsub/authenticate";
pub const ROUTE_SUBSCRIBE: &str = "/pubsub/subscribe";
pub const ROUTE_UNSUBSCRIBE: &str = "/pubsub/unsubscribe";
pub const ROUTE_PUBLISH: &str = "/pubsub/publish";
pub const ROUTE_PUBLISH_TO_ONE: &str = "/pubsub/publish_to_one";

/// Longest topic name the `u16` length prefix can describe.
pub const MAX_TOPIC_NAME_LEN: usize = u16::MAX as usize;

/// Per-call timeout used by [`crate::PubSubClient`] unless overridden.
pub const DEFAULT_PUBSUB_CALL_TIMEOUT: Duration = Duration::from_secs(5);

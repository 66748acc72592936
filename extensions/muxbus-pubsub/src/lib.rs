//! Topic fan-out on top of the muxbus RPC transport.
//!
//! Every pub/sub operation is an ordinary call whose body is a [`Topic`]
//! envelope. The server keeps one [`TopicAgent`] per topic name and pushes
//! published envelopes to subscribers as notifications on the
//! [`ROUTE_PUBLISH`] method. Delivery is at-most-once with no confirmation:
//! a subscriber whose outbound queue is full simply misses the message.

pub mod constants;
pub use constants::*;

mod client;
pub use client::*;

mod client_topics;
pub use client_topics::*;

mod error;
pub use error::*;

mod registry;
pub use registry::*;

mod server;
pub use server::*;

mod topic;
pub use topic::*;

mod topic_agent;
pub use topic_agent::*;

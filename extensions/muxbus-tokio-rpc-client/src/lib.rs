mod async_handler;
mod config;
pub use config::RpcClientConfig;
mod connection;
pub use connection::{BoxedConnection, RpcConnection, RpcDialer, tcp_dialer};
mod error;
pub use error::RpcClientError;
mod frame_io;
mod message_handler;
pub use message_handler::{NoopMessageHandler, RpcMessageHandler};
mod rpc_client;
pub use rpc_client::{ClientHook, RpcClient};
mod rpc_context;
pub use rpc_context::RpcContext;
mod rpc_response;
pub use rpc_response::{RpcResponse, RpcResponseCallback};
mod rpc_session;

mod rpc_server;
pub use rpc_server::*;
pub mod utils;
pub use muxbus_rpc_service_endpoint::{RpcServiceEndpoint, RpcServiceEndpointError};

mod endpoint;
pub use endpoint::*;

pub mod error;
pub use error::RpcServiceEndpointError;

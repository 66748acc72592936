mod body;
pub use body::*;
mod codec;
pub use codec::*;
pub mod constants;
pub use constants::*;
mod rpc_timeout;
pub use rpc_timeout::*;

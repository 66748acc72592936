use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any duplex byte stream the runtime can own.
pub trait RpcConnection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RpcConnection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedConnection = Box<dyn RpcConnection>;

/// Opens a fresh connection. Client-role runtimes call it again after a
/// read failure.
pub type RpcDialer = Arc<dyn Fn() -> BoxFuture<'static, io::Result<BoxedConnection>> + Send + Sync>;

/// A dialer that opens a TCP connection to `addr` with Nagle disabled.
pub fn tcp_dialer(addr: impl Into<String>) -> RpcDialer {
    let addr: String = addr.into();
    Arc::new(move || {
        let addr = addr.clone();
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedConnection)
        }
        .boxed()
    })
}

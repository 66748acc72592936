//! Note: this server performs no authentication of its own. Anything that
//! needs a gate (see the pub/sub server) enforces it in its handlers.

use muxbus_rpc_service_endpoint::RpcServiceEndpoint;
use muxbus_tokio_rpc_client::{ClientHook, RpcClient, RpcClientConfig, RpcConnection};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ServerHooks {
    on_connected: Option<ClientHook>,
    on_disconnected: Option<ClientHook>,
}

/// Accepts TCP connections and runs a server-role [`RpcClient`] for each,
/// dispatching its requests to a shared [`RpcServiceEndpoint`].
pub struct RpcServer {
    endpoint: Arc<RpcServiceEndpoint>,
    config: RpcClientConfig,
    clients: Mutex<HashMap<u64, RpcClient>>,
    hooks: Mutex<ServerHooks>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcServer {
    pub fn new() -> Self {
        Self::with_config(RpcClientConfig::default())
    }

    /// `config` applies to every accepted connection.
    pub fn with_config(config: RpcClientConfig) -> Self {
        RpcServer {
            endpoint: Arc::new(RpcServiceEndpoint::new()),
            config,
            clients: Mutex::new(HashMap::new()),
            hooks: Mutex::new(ServerHooks::default()),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// The endpoint requests are dispatched to. Register handlers here.
    pub fn endpoint(&self) -> Arc<RpcServiceEndpoint> {
        self.endpoint.clone()
    }

    /// Fires for each accepted connection, before it starts reading.
    pub fn on_connected(&self, hook: impl Fn(&RpcClient) + Send + Sync + 'static) {
        self.lock_hooks().on_connected = Some(Arc::new(hook));
    }

    /// Fires once for each connection that goes away.
    pub fn on_disconnected(&self, hook: impl Fn(&RpcClient) + Send + Sync + 'static) {
        self.lock_hooks().on_disconnected = Some(Arc::new(hook));
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    /// Snapshot of the live connections.
    pub fn clients(&self) -> Vec<RpcClient> {
        self.lock_clients().values().cloned().collect()
    }

    /// Binds to `addr` and serves until [`RpcServer::shutdown`].
    pub async fn serve<A: ToSocketAddrs>(self: Arc<Self>, addr: A) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serves on a listener that is already bound, e.g. to port 0.
    pub async fn serve_with_listener(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let address = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!("Server running on {:?}", address);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_requested(&mut shutdown_rx) => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %err, "failed to disable Nagle");
                    }
                    self.accept_connection(stream, peer);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }

        tracing::info!("Server on {:?} shut down", address);
        Ok(())
    }

    /// Takes over an accepted connection and starts its runtime.
    pub fn accept_connection<C: RpcConnection>(
        self: &Arc<Self>,
        connection: C,
        peer: SocketAddr,
    ) -> RpcClient {
        let client = RpcClient::from_connection(
            connection,
            peer.to_string(),
            self.endpoint.clone(),
            self.config.clone(),
        );

        let server: Weak<RpcServer> = Arc::downgrade(self);
        client.on_disconnected(move |client| {
            if let Some(server) = server.upgrade() {
                server.remove_client(client);
            }
        });

        self.lock_clients().insert(client.id(), client.clone());
        tracing::info!(client_id = client.id(), %peer, "Client connected");

        let on_connected = self.lock_hooks().on_connected.clone();
        if let Some(hook) = on_connected {
            hook(&client);
        }

        client.run();
        client
    }

    /// Stops accepting and closes every live connection.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        for client in self.clients() {
            client.stop();
        }
    }

    fn remove_client(&self, client: &RpcClient) {
        if self.lock_clients().remove(&client.id()).is_none() {
            return;
        }
        tracing::info!(
            client_id = client.id(),
            peer = client.peer(),
            "Client disconnected"
        );

        let on_disconnected = self.lock_hooks().on_disconnected.clone();
        if let Some(hook) = on_disconnected {
            hook(client);
        }
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<u64, RpcClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hooks(&self) -> MutexGuard<'_, ServerHooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

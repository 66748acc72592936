use crate::{
    async_handler::AsyncHandler,
    config::RpcClientConfig,
    connection::{BoxedConnection, RpcConnection, RpcDialer, tcp_dialer},
    error::RpcClientError,
    frame_io::{read_message, write_message},
    message_handler::RpcMessageHandler,
    rpc_response::{RpcResponse, RpcResponseCallback},
    rpc_session::{DeliverySlot, RpcSession},
};
use futures::FutureExt;
use muxbus::{
    frame::{FrameCommand, Message},
    pool::{ObjectPool, SharedBufferPool},
    utils::{increment_u64_id, panic_message},
};
use muxbus_rpc_service::{FromRpcBody, RpcTimeout, ToRpcBody};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{BufReader, ReadHalf, WriteHalf};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tokio::time::Instant;

/// Callback fired on connection lifecycle events.
pub type ClientHook = Arc<dyn Fn(&RpcClient) + Send + Sync>;

type ConnectionReader = BufReader<ReadHalf<BoxedConnection>>;
type ConnectionWriter = WriteHalf<BoxedConnection>;
type UserData = Arc<dyn Any + Send + Sync>;

/// Everything guarded by the connection's lock.
struct ClientState {
    running: bool,
    reconnecting: bool,
    sessions: HashMap<u64, RpcSession>,
    async_handlers: HashMap<u64, AsyncHandler>,
}

#[derive(Default)]
struct ClientHooks {
    on_connected: Option<ClientHook>,
    on_disconnected: Option<ClientHook>,
    on_stop: Option<ClientHook>,
}

struct ClientShared {
    id: u64,
    peer: String,
    config: RpcClientConfig,
    handler: Arc<dyn RpcMessageHandler>,
    dialer: Option<RpcDialer>,

    state: Mutex<ClientState>,
    hooks: Mutex<ClientHooks>,
    user_data: Mutex<Option<UserData>>,
    sequence: AtomicU64,

    send_tx: mpsc::Sender<Message>,
    // Both taken by the first `run`.
    send_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    reader: Mutex<Option<ConnectionReader>>,
    writer: tokio::sync::Mutex<Option<ConnectionWriter>>,
    stop_tx: watch::Sender<bool>,

    sessions_pool: ObjectPool<RpcSession>,
    handlers_pool: ObjectPool<AsyncHandler>,
}

/// The runtime for one connection.
///
/// An `RpcClient` owns a duplex byte stream and drives it with two tasks
/// started by [`RpcClient::run`]: a send loop draining a bounded outbound
/// queue and a receive loop reading frames and handing them to an
/// [`RpcMessageHandler`]. Synchronous calls, asynchronous calls and
/// notifications are multiplexed over the stream and matched to their
/// responses by sequence number.
///
/// A client built with a dialer (see [`RpcClient::connect`]) re-dials after a
/// read failure and keeps going; one built from an accepted connection
/// ([`RpcClient::from_connection`]) stops instead.
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<ClientShared>,
}

impl RpcClient {
    /// Wraps an established connection. Used for server-role connections,
    /// which stop on the first read failure.
    pub fn from_connection<C: RpcConnection>(
        connection: C,
        peer: impl Into<String>,
        handler: Arc<dyn RpcMessageHandler>,
        config: RpcClientConfig,
    ) -> Self {
        Self::new(Box::new(connection), peer.into(), handler, None, config)
    }

    /// Dials `addr` over TCP. The returned client re-dials the same address
    /// whenever the connection breaks.
    pub async fn connect(
        addr: impl Into<String>,
        handler: Arc<dyn RpcMessageHandler>,
        config: RpcClientConfig,
    ) -> io::Result<Self> {
        let addr = addr.into();
        Self::connect_with(tcp_dialer(addr.clone()), addr, handler, config).await
    }

    /// Dials once with `dialer` and keeps it for reconnecting.
    pub async fn connect_with(
        dialer: RpcDialer,
        peer: impl Into<String>,
        handler: Arc<dyn RpcMessageHandler>,
        config: RpcClientConfig,
    ) -> io::Result<Self> {
        let connection = dialer().await?;
        Ok(Self::new(
            connection,
            peer.into(),
            handler,
            Some(dialer),
            config,
        ))
    }

    fn new(
        connection: BoxedConnection,
        peer: String,
        handler: Arc<dyn RpcMessageHandler>,
        dialer: Option<RpcDialer>,
        config: RpcClientConfig,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(connection);
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_size.max(1));
        let (stop_tx, _) = watch::channel(false);

        let shared = ClientShared {
            id: increment_u64_id(),
            peer,
            handler,
            dialer,
            state: Mutex::new(ClientState {
                running: true,
                reconnecting: false,
                sessions: HashMap::new(),
                async_handlers: HashMap::new(),
            }),
            hooks: Mutex::new(ClientHooks::default()),
            user_data: Mutex::new(None),
            sequence: AtomicU64::new(1),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            reader: Mutex::new(Some(BufReader::with_capacity(
                config.read_buffer_size,
                read_half,
            ))),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            stop_tx,
            sessions_pool: ObjectPool::new(config.object_pool_capacity),
            handlers_pool: ObjectPool::new(config.object_pool_capacity),
            config,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Process-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Label of the remote end, for logs.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.shared.config
    }

    pub fn buffer_pool(&self) -> &SharedBufferPool {
        &self.shared.config.buffer_pool
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn is_reconnecting(&self) -> bool {
        self.lock_state().reconnecting
    }

    /// Synchronous calls waiting for a response.
    pub fn pending_sessions(&self) -> usize {
        self.lock_state().sessions.len()
    }

    /// Asynchronous calls whose callback has not fired or expired yet.
    pub fn pending_async_handlers(&self) -> usize {
        self.lock_state().async_handlers.len()
    }

    pub fn on_connected(&self, hook: impl Fn(&RpcClient) + Send + Sync + 'static) {
        self.lock_hooks().on_connected = Some(Arc::new(hook));
    }

    pub fn on_disconnected(&self, hook: impl Fn(&RpcClient) + Send + Sync + 'static) {
        self.lock_hooks().on_disconnected = Some(Arc::new(hook));
    }

    pub fn on_stop(&self, hook: impl Fn(&RpcClient) + Send + Sync + 'static) {
        self.lock_hooks().on_stop = Some(Arc::new(hook));
    }

    /// Attaches connection-local state, replacing anything set before.
    pub fn set_user_data<T: Any + Send + Sync>(&self, value: T) {
        *self.lock_user_data() = Some(Arc::new(value));
    }

    /// The attached state, if there is some and it is a `T`.
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.lock_user_data().clone()?;
        data.downcast::<T>().ok()
    }

    pub fn clear_user_data(&self) {
        self.lock_user_data().take();
    }

    /// Starts the send and receive loops.
    ///
    /// Only the first call on a running client does anything.
    pub fn run(&self) {
        if !self.is_running() {
            return;
        }

        let send_rx = self.lock_or_recover(&self.shared.send_rx).take();
        let reader = self.lock_or_recover(&self.shared.reader).take();
        let (Some(send_rx), Some(reader)) = (send_rx, reader) else {
            return;
        };

        tracing::debug!(client_id = self.id(), peer = self.peer(), "client running");
        tokio::spawn(self.clone().send_loop(send_rx));
        tokio::spawn(self.clone().recv_loop(reader));
    }

    /// Stops the runtime.
    ///
    /// The connection is closed, queued messages are dropped without being
    /// written, and the stop and disconnect hooks fire. Only the first call
    /// has any effect.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            if !state.running {
                return;
            }
            state.running = false;
        }

        self.shared.stop_tx.send_replace(true);

        // Never ran: nothing else will drop these.
        drop(self.lock_or_recover(&self.shared.send_rx).take());
        drop(self.lock_or_recover(&self.shared.reader).take());
        // A running send loop holds this lock while writing; it drops the
        // writer itself once it sees the stop signal.
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            drop(writer.take());
        }

        tracing::info!(client_id = self.id(), peer = self.peer(), "client stopped");

        let (on_stop, on_disconnected) = {
            let hooks = self.lock_hooks();
            (hooks.on_stop.clone(), hooks.on_disconnected.clone())
        };
        if let Some(hook) = on_stop {
            self.fire_hook("on_stop", &hook);
        }
        if let Some(hook) = on_disconnected {
            self.fire_hook("on_disconnected", &hook);
        }
    }

    /// Calls `method` and waits for the response.
    ///
    /// `timeout` bounds queueing and waiting together. `NonBlocking` is
    /// rejected since a synchronous call always has to wait for its answer.
    pub async fn call<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        timeout: impl Into<RpcTimeout>,
    ) -> Result<Resp, RpcClientError>
    where
        Req: ToRpcBody + ?Sized,
        Resp: FromRpcBody,
    {
        let deadline = match timeout.into() {
            RpcTimeout::NonBlocking => return Err(RpcClientError::InvalidTimeout),
            RpcTimeout::Within(duration) => Instant::now().checked_add(duration),
            RpcTimeout::Forever => None,
        };

        self.ensure_usable()?;
        let message = self.new_request_message(FrameCommand::Request, method, request, false)?;
        let sequence = message.sequence();

        let slot = self.add_session(sequence);
        let outcome = self.exchange(message, slot, deadline).await;
        if self.delete_session(sequence).is_some() {
            tracing::trace!(client_id = self.id(), sequence, "dropping late response");
        }

        RpcResponse::new(outcome?).bind()
    }

    /// Sends `method` flagged as asynchronous and returns once it is queued.
    ///
    /// With a callback, the response is handed to it from the receive loop.
    /// Under `Within(d)` the callback is dropped if no response arrives within
    /// `d` of queueing; under `NonBlocking` and `Forever` it stays registered
    /// until the response arrives.
    pub async fn call_async<Req>(
        &self,
        method: &str,
        request: &Req,
        callback: Option<RpcResponseCallback>,
        timeout: impl Into<RpcTimeout>,
    ) -> Result<(), RpcClientError>
    where
        Req: ToRpcBody + ?Sized,
    {
        self.send_async(FrameCommand::Request, method, request, callback, timeout.into())
            .await
    }

    /// Fire-and-forget. The peer never answers a notification.
    pub async fn notify<Req>(
        &self,
        method: &str,
        data: &Req,
        timeout: impl Into<RpcTimeout>,
    ) -> Result<(), RpcClientError>
    where
        Req: ToRpcBody + ?Sized,
    {
        self.send_async(FrameCommand::Notify, method, data, None, timeout.into())
            .await
    }

    /// Queues an already-built message.
    ///
    /// The message is consumed: on failure it is released here. Retain it
    /// first to push the same frame to several connections.
    pub async fn push_message(
        &self,
        message: Message,
        timeout: impl Into<RpcTimeout>,
    ) -> Result<(), RpcClientError> {
        self.ensure_usable()?;
        self.enqueue(message, timeout.into()).await
    }

    /// Routes a response or error frame to the session or async handler
    /// waiting on its sequence number. Frames nobody is waiting for are
    /// dropped.
    pub fn handle_response(&self, message: Message) {
        let sequence = message.sequence();

        if !message.is_async() {
            let state = self.lock_state();
            match state.sessions.get(&sequence) {
                Some(session) => session.deliver(message),
                None => tracing::trace!(
                    client_id = self.id(),
                    sequence,
                    "no session waiting for response"
                ),
            }
            return;
        }

        let Some(mut handler) = self.lock_state().async_handlers.remove(&sequence) else {
            tracing::trace!(
                client_id = self.id(),
                sequence,
                "no async handler waiting for response"
            );
            return;
        };
        let callback = handler.take_callback();
        self.shared.handlers_pool.put(handler);

        if let Some(callback) = callback {
            let response = RpcResponse::new(message);
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(response))) {
                tracing::error!(
                    client_id = self.id(),
                    sequence,
                    "async response callback panicked: {}",
                    panic_message(&*panic)
                );
            }
        }
    }

    async fn send_async<Req>(
        &self,
        command: FrameCommand,
        method: &str,
        request: &Req,
        callback: Option<RpcResponseCallback>,
        timeout: RpcTimeout,
    ) -> Result<(), RpcClientError>
    where
        Req: ToRpcBody + ?Sized,
    {
        self.ensure_usable()?;
        let message = self.new_request_message(command, method, request, true)?;
        let sequence = message.sequence();

        // Registered before queueing so a fast response always finds it.
        let has_callback = callback.is_some();
        if let Some(callback) = callback {
            self.add_async_handler(sequence, callback);
        }

        if let Err(err) = self.enqueue(message, timeout).await {
            if has_callback {
                self.delete_async_handler(sequence);
            }
            return Err(err);
        }

        if has_callback {
            if let RpcTimeout::Within(expiry) = timeout {
                self.arm_async_expiry(sequence, expiry);
            }
        }
        Ok(())
    }

    fn new_request_message<Req>(
        &self,
        command: FrameCommand,
        method: &str,
        request: &Req,
        is_async: bool,
    ) -> Result<Message, RpcClientError>
    where
        Req: ToRpcBody + ?Sized,
    {
        let body = request.to_rpc_body()?;
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Message::new(
            self.buffer_pool(),
            command,
            sequence,
            is_async,
            method,
            &body,
        )?)
    }

    fn ensure_usable(&self) -> Result<(), RpcClientError> {
        let state = self.lock_state();
        if !state.running {
            Err(RpcClientError::Stopped)
        } else if state.reconnecting {
            Err(RpcClientError::Reconnecting)
        } else {
            Ok(())
        }
    }

    async fn enqueue(&self, message: Message, timeout: RpcTimeout) -> Result<(), RpcClientError> {
        let send_tx = &self.shared.send_tx;
        match timeout {
            RpcTimeout::NonBlocking => send_tx.try_send(message).map_err(|err| match err {
                TrySendError::Full(_) => RpcClientError::QueueIsFull,
                TrySendError::Closed(_) => RpcClientError::Stopped,
            }),
            RpcTimeout::Within(duration) => {
                match tokio::time::timeout(duration, send_tx.send(message)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(RpcClientError::Stopped),
                    Err(_) => Err(RpcClientError::Timeout),
                }
            }
            RpcTimeout::Forever => send_tx
                .send(message)
                .await
                .map_err(|_| RpcClientError::Stopped),
        }
    }

    /// Queues a request and waits for its session to be filled.
    async fn exchange(
        &self,
        message: Message,
        slot: Arc<DeliverySlot>,
        deadline: Option<Instant>,
    ) -> Result<Message, RpcClientError> {
        let mut stop_rx = self.shared.stop_tx.subscribe();
        let exchange = async {
            if self.shared.send_tx.send(message).await.is_err() {
                return Err(RpcClientError::Stopped);
            }
            tokio::select! {
                response = slot.wait() => Ok(response),
                _ = stopped(&mut stop_rx) => Err(RpcClientError::Stopped),
            }
        };

        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, exchange)
                .await
                .unwrap_or(Err(RpcClientError::Timeout)),
            None => exchange.await,
        }
    }

    fn add_session(&self, sequence: u64) -> Arc<DeliverySlot> {
        let session = self.shared.sessions_pool.get();
        let slot = session.slot();
        self.lock_state().sessions.insert(sequence, session);
        slot
    }

    /// Unregisters a session, returning a response that arrived after the
    /// caller stopped waiting.
    fn delete_session(&self, sequence: u64) -> Option<Message> {
        let session = self.lock_state().sessions.remove(&sequence)?;
        let late = session.take_delivered();
        self.shared.sessions_pool.put(session);
        late
    }

    fn add_async_handler(&self, sequence: u64, callback: RpcResponseCallback) {
        let mut handler = self.shared.handlers_pool.get();
        handler.arm(callback);
        self.lock_state().async_handlers.insert(sequence, handler);
    }

    fn delete_async_handler(&self, sequence: u64) {
        let handler = self.lock_state().async_handlers.remove(&sequence);
        if let Some(handler) = handler {
            self.shared.handlers_pool.put(handler);
        }
    }

    fn arm_async_expiry(&self, sequence: u64, expiry: Duration) {
        let shared = Arc::downgrade(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            if let Some(shared) = shared.upgrade() {
                RpcClient { shared }.expire_async_handler(sequence);
            }
        });

        let mut state = self.lock_state();
        match state.async_handlers.get_mut(&sequence) {
            Some(handler) => handler.set_expiry(timer.abort_handle()),
            // Already answered.
            None => timer.abort(),
        }
    }

    fn expire_async_handler(&self, sequence: u64) {
        let handler = self.lock_state().async_handlers.remove(&sequence);
        if let Some(mut handler) = handler {
            tracing::trace!(client_id = self.id(), sequence, "async handler expired");
            handler.disarm_expiry();
            self.shared.handlers_pool.put(handler);
        }
    }

    async fn send_loop(self, mut send_rx: mpsc::Receiver<Message>) {
        let mut stop_rx = self.shared.stop_tx.subscribe();

        loop {
            let message = tokio::select! {
                message = send_rx.recv() => message,
                _ = stopped(&mut stop_rx) => None,
            };
            let Some(message) = message else {
                break;
            };

            if self.is_reconnecting() {
                tracing::trace!(
                    client_id = self.id(),
                    sequence = message.sequence(),
                    "dropping outbound frame while reconnecting"
                );
                continue;
            }

            // A peer that stops reading must not pin the writer past `stop`.
            let written = {
                let mut writer = self.shared.writer.lock().await;
                match writer.as_mut() {
                    Some(writer) => tokio::select! {
                        result = write_message(writer, &message) => Some(result),
                        _ = stopped(&mut stop_rx) => None,
                    },
                    None => Some(Ok(())),
                }
            };
            match written {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    tracing::debug!(client_id = self.id(), error = %err, "write failed")
                }
                None => break,
            }
        }

        send_rx.close();
        let mut dropped = 0usize;
        while send_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(client_id = self.id(), dropped, "discarded queued frames on stop");
        }

        // No shutdown: it can stall on a peer that stopped reading.
        drop(self.shared.writer.lock().await.take());
    }

    async fn recv_loop(self, mut reader: ConnectionReader) {
        let mut stop_rx = self.shared.stop_tx.subscribe();
        let pool = self.buffer_pool().clone();
        let max_body_len = self.shared.config.max_body_len;

        loop {
            let result = tokio::select! {
                result = read_message(&mut reader, &pool, max_body_len) => result,
                _ = stopped(&mut stop_rx) => break,
            };

            match result {
                Ok(message) => self.dispatch(message).await,
                Err(err) => match self.shared.dialer.clone() {
                    None => {
                        tracing::info!(
                            client_id = self.id(),
                            peer = self.peer(),
                            error = %err,
                            "connection closed"
                        );
                        self.stop();
                        break;
                    }
                    Some(dialer) => {
                        tracing::warn!(
                            client_id = self.id(),
                            peer = self.peer(),
                            error = %err,
                            "connection lost, reconnecting"
                        );
                        match self.reconnect(reader, &dialer, &mut stop_rx).await {
                            Some(fresh) => reader = fresh,
                            None => break,
                        }
                    }
                },
            }
        }
    }

    async fn dispatch(&self, message: Message) {
        let sequence = message.sequence();
        let handler = self.shared.handler.clone();
        let handled = AssertUnwindSafe(handler.on_message(self, message))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            tracing::error!(
                client_id = self.id(),
                sequence,
                "message handler panicked: {}",
                panic_message(&*panic)
            );
        }
    }

    /// Replaces a broken connection, retrying the dialer until it succeeds
    /// or the client is stopped.
    async fn reconnect(
        &self,
        broken: ConnectionReader,
        dialer: &RpcDialer,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Option<ConnectionReader> {
        {
            let mut state = self.lock_state();
            if !state.running {
                return None;
            }
            state.reconnecting = true;
        }

        drop(broken);
        drop(self.shared.writer.lock().await.take());

        let delay = self.shared.config.reconnect_delay;
        loop {
            if !self.is_running() {
                return None;
            }

            let dialed = tokio::select! {
                dialed = dialer() => dialed,
                _ = stopped(stop_rx) => return None,
            };

            match dialed {
                Ok(connection) => {
                    let (read_half, write_half) = tokio::io::split(connection);
                    *self.shared.writer.lock().await = Some(write_half);

                    let still_running = {
                        let mut state = self.lock_state();
                        if state.running {
                            state.reconnecting = false;
                        }
                        state.running
                    };
                    if !still_running {
                        self.shared.writer.lock().await.take();
                        return None;
                    }

                    tracing::info!(client_id = self.id(), peer = self.peer(), "reconnected");

                    let on_connected = self.lock_hooks().on_connected.clone();
                    if let Some(hook) = on_connected {
                        let client = self.clone();
                        tokio::spawn(async move { client.fire_hook("on_connected", &hook) });
                    }

                    return Some(BufReader::with_capacity(
                        self.shared.config.read_buffer_size,
                        read_half,
                    ));
                }
                Err(err) => {
                    tracing::debug!(
                        client_id = self.id(),
                        peer = self.peer(),
                        error = %err,
                        "dial failed, retrying in {:?}",
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stopped(stop_rx) => return None,
                    }
                }
            }
        }
    }

    fn fire_hook(&self, name: &str, hook: &ClientHook) {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
            tracing::error!(
                client_id = self.id(),
                hook = name,
                "hook panicked: {}",
                panic_message(&*panic)
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.lock_or_recover(&self.shared.state)
    }

    fn lock_hooks(&self) -> MutexGuard<'_, ClientHooks> {
        self.lock_or_recover(&self.shared.hooks)
    }

    fn lock_user_data(&self) -> MutexGuard<'_, Option<UserData>> {
        self.lock_or_recover(&self.shared.user_data)
    }

    fn lock_or_recover<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("id", &self.id())
            .field("peer", &self.peer())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Resolves once the stop signal has been raised.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

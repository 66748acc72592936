use bitcode::{Decode, Encode};
use futures::FutureExt;
use muxbus::frame::{FrameCommand, Message};
use muxbus::pool::{NonRecyclingBufferPool, SharedBufferPool};
use muxbus_rpc_service::{BitcodeCodec, Decoded, Encoded, RpcTimeout};
use muxbus_tokio_rpc_client::{
    BoxedConnection, NoopMessageHandler, RpcClient, RpcClientConfig, RpcClientError, RpcContext,
    RpcDialer, RpcMessageHandler,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Encode, Decode)]
struct AddRequest {
    numbers: Vec<f64>,
}

#[derive(Debug, Encode, Decode)]
struct AddResponse {
    sum: f64,
}

#[derive(Default)]
struct TestHandler {
    notified: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl RpcMessageHandler for TestHandler {
    async fn on_request(&self, ctx: RpcContext) {
        let result = match ctx.method() {
            "echo" => ctx.write(ctx.body()).await,
            "fail" => ctx.error("boom").await,
            "add" => match ctx.bind::<Decoded<AddRequest>>() {
                Ok(request) => {
                    let sum = request.into_inner().numbers.iter().sum();
                    ctx.write(&Encoded::<_, BitcodeCodec>::new(&AddResponse { sum }))
                        .await
                }
                Err(err) => ctx.error(err).await,
            },
            "delayed" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ctx.write(ctx.body()).await
            }
            "silent" => Ok(()),
            "panic" => panic!("handler exploded"),
            "note" => {
                self.notified.fetch_add(1, Ordering::SeqCst);
                // Notifications are never answered; this must be a no-op.
                ctx.write("ignored").await
            }
            other => ctx.error(format!("method not found: {other}")).await,
        };
        let _ = result;
    }
}

fn serve(connection: tokio::io::DuplexStream, config: RpcClientConfig) -> RpcClient {
    let server = RpcClient::from_connection(
        connection,
        "test-server",
        Arc::new(TestHandler::default()),
        config,
    );
    server.run();
    server
}

fn connected_pair(config: RpcClientConfig) -> (RpcClient, RpcClient) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let server = serve(server_end, config.clone());
    let client = RpcClient::from_connection(
        client_end,
        "test-client",
        Arc::new(NoopMessageHandler),
        config,
    );
    client.run();
    (client, server)
}

/// Writes to `peer` until the other end is gone.
async fn peer_sees_close(peer: &mut DuplexStream) -> bool {
    for _ in 0..100 {
        if let Ok(Err(_)) =
            tokio::time::timeout(Duration::from_millis(10), peer.write_all(b"x")).await
        {
            return true;
        }
    }
    false
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn call_echoes_text() {
    let (client, _server) = connected_pair(RpcClientConfig::default());

    let out: String = client
        .call("echo", "hi", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(out, "hi");
    assert_eq!(client.pending_sessions(), 0);
}

#[tokio::test]
async fn call_decodes_structured_responses() {
    let (client, _server) = connected_pair(RpcClientConfig::default());

    let request = AddRequest {
        numbers: vec![1.0, 2.0, 3.5],
    };
    let response: Decoded<AddResponse> = client
        .call(
            "add",
            &Encoded::<_, BitcodeCodec>::new(&request),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    assert_eq!(response.into_inner().sum, 6.5);
}

#[tokio::test]
async fn error_frames_become_remote_errors() {
    let (client, _server) = connected_pair(RpcClientConfig::default());

    let err = client
        .call::<_, ()>("fail", &(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcClientError::Remote(ref msg) if msg == "boom"));
}

#[tokio::test]
async fn call_refuses_to_not_wait() {
    let (client, _server) = connected_pair(RpcClientConfig::default());

    let err = client
        .call::<_, String>("echo", "hi", RpcTimeout::NonBlocking)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcClientError::InvalidTimeout));
}

#[tokio::test]
async fn late_response_after_timeout_is_discarded() {
    let (client, _server) = connected_pair(RpcClientConfig::default());

    let err = client
        .call::<_, String>("delayed", "late", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Timeout));
    assert_eq!(client.pending_sessions(), 0);

    // Let the late response arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let out: String = client
        .call("echo", "fresh", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "fresh");
}

#[tokio::test]
async fn call_async_delivers_to_callback() {
    let (client, _server) = connected_pair(RpcClientConfig::default());
    let (tx, rx) = oneshot::channel();

    client
        .call_async(
            "echo",
            "async hello",
            Some(Box::new(move |response| {
                let _ = tx.send(response.bind::<String>());
            })),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    let out = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(out, "async hello");
    assert_eq!(client.pending_async_handlers(), 0);
}

#[tokio::test]
async fn unanswered_async_handler_expires() {
    let (client, _server) = connected_pair(RpcClientConfig::default());
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    client
        .call_async(
            "silent",
            &(),
            Some(Box::new(move |_| flag.store(true, Ordering::SeqCst))),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
    assert_eq!(client.pending_async_handlers(), 1);

    assert!(eventually(|| client.pending_async_handlers() == 0).await);
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn sequence_numbers_strictly_increase() {
    let (client, _server) = connected_pair(RpcClientConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..16 {
        let tx = tx.clone();
        client
            .call_async(
                "echo",
                &format!("{i}"),
                Some(Box::new(move |response| {
                    let _ = tx.send(response.sequence());
                })),
                RpcTimeout::Forever,
            )
            .await
            .unwrap();
    }

    let mut sequences = Vec::new();
    while sequences.len() < 16 {
        let seq = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        sequences.push(seq);
    }

    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn full_queue_rejects_non_blocking_work() {
    // The peer never reads, so the writer stalls and the queue backs up.
    let (client_end, _stalled_peer) = tokio::io::duplex(16);
    let client = RpcClient::from_connection(
        client_end,
        "stalled",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default().with_send_queue_size(1),
    );
    client.run();

    let payload = vec![0u8; 256];
    let mut saw_full = false;
    for _ in 0..50 {
        match client
            .notify("note", &payload, RpcTimeout::NonBlocking)
            .await
        {
            Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(RpcClientError::QueueIsFull) => {
                saw_full = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_full);

    let err = client
        .call_async(
            "echo",
            &payload,
            Some(Box::new(|_| {})),
            RpcTimeout::NonBlocking,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::QueueIsFull));
    assert_eq!(client.pending_async_handlers(), 0);

    let err = client
        .call_async("echo", &payload, None, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Timeout));

    let err = client
        .call::<_, Vec<u8>>("echo", &payload, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Timeout));
    assert_eq!(client.pending_sessions(), 0);
}

#[tokio::test]
async fn notifications_reach_the_handler_and_are_not_answered() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let handler = TestHandler::default();
    let notified = handler.notified.clone();
    let server = RpcClient::from_connection(
        server_end,
        "server",
        Arc::new(handler),
        RpcClientConfig::default(),
    );
    server.run();
    let client = RpcClient::from_connection(
        client_end,
        "client",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default(),
    );
    client.run();

    client
        .notify("note", "fire and forget", Duration::from_secs(1))
        .await
        .unwrap();

    let out: String = client
        .call("echo", "after", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "after");
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_panic_does_not_kill_the_connection() {
    let (client, server) = connected_pair(RpcClientConfig::default());

    let err = client
        .call::<_, ()>("panic", &(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Timeout));
    assert!(server.is_running());

    let out: String = client
        .call("echo", "still here", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "still here");
}

#[tokio::test]
async fn stop_is_idempotent_and_fires_hooks_once() {
    let (client, _server) = connected_pair(RpcClientConfig::default());
    let stops = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let counter = stops.clone();
    client.on_stop(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = disconnects.clone();
    client.on_disconnected(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.stop() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    let err = client
        .call::<_, String>("echo", "hi", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Stopped));

    // Running again after a stop does nothing.
    client.run();
    assert!(!client.is_running());
}

#[tokio::test]
async fn server_role_connection_stops_when_peer_goes_away() {
    let (client, server) = connected_pair(RpcClientConfig::default());

    client.stop();

    assert!(eventually(|| !server.is_running()).await);
}

#[tokio::test]
async fn client_reconnects_through_its_dialer() {
    let allow_dial = Arc::new(AtomicBool::new(true));
    let current_server: Arc<Mutex<Option<RpcClient>>> = Arc::new(Mutex::new(None));

    let dialer: RpcDialer = {
        let allow_dial = allow_dial.clone();
        let current_server = current_server.clone();
        Arc::new(move || {
            let allow_dial = allow_dial.clone();
            let current_server = current_server.clone();
            async move {
                if !allow_dial.load(Ordering::SeqCst) {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "dial refused",
                    ));
                }
                let (client_end, server_end) = tokio::io::duplex(64 * 1024);
                let server = serve(server_end, RpcClientConfig::default());
                *current_server.lock().unwrap() = Some(server);
                Ok(Box::new(client_end) as BoxedConnection)
            }
            .boxed()
        })
    };

    let client = RpcClient::connect_with(
        dialer,
        "duplex",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default().with_reconnect_delay(Duration::from_millis(20)),
    )
    .await
    .unwrap();
    let reconnects = Arc::new(AtomicUsize::new(0));
    let counter = reconnects.clone();
    client.on_connected(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    client.run();

    let out: String = client
        .call("echo", "first", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "first");

    // Break the connection and keep the dialer failing for a while.
    allow_dial.store(false, Ordering::SeqCst);
    let server = current_server.lock().unwrap().take().unwrap();
    server.stop();

    assert!(eventually(|| client.is_reconnecting()).await);
    let err = client
        .call::<_, String>("echo", "during", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Reconnecting));
    assert!(err.is_transient());

    allow_dial.store(true, Ordering::SeqCst);
    assert!(eventually(|| !client.is_reconnecting()).await);
    assert!(eventually(|| reconnects.load(Ordering::SeqCst) == 1).await);

    let out: String = client
        .call("echo", "second", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "second");
    assert!(client.is_running());

    client.stop();
}

#[tokio::test]
async fn every_frame_buffer_is_released() {
    let counter = Arc::new(NonRecyclingBufferPool::new());
    let pool: SharedBufferPool = counter.clone();
    let config = RpcClientConfig::default().with_buffer_pool(pool);
    let (client, server) = connected_pair(config);

    for i in 0..8 {
        let out: String = client
            .call("echo", &format!("msg {i}"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(out, format!("msg {i}"));
    }
    let _ = client
        .call::<_, ()>("fail", &(), Duration::from_secs(2))
        .await;
    client
        .notify("note", "bye", Duration::from_secs(1))
        .await
        .unwrap();

    client.stop();
    assert!(eventually(|| !server.is_running()).await);

    assert!(counter.acquired_count() > 0);
    assert!(eventually(|| counter.outstanding() == 0).await);
}

#[tokio::test]
async fn late_response_after_async_expiry_skips_the_callback() {
    let (client, _server) = connected_pair(RpcClientConfig::default());
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    client
        .call_async(
            "delayed",
            "late",
            Some(Box::new(move |_| flag.store(true, Ordering::SeqCst))),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
    assert!(eventually(|| client.pending_async_handlers() == 0).await);

    // The handler answers after 200ms.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!fired.load(Ordering::SeqCst));

    let out: String = client
        .call("echo", "after", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(out, "after");
}

#[tokio::test]
async fn pushed_message_is_written_as_is() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let handler = TestHandler::default();
    let notified = handler.notified.clone();
    let server = RpcClient::from_connection(
        server_end,
        "server",
        Arc::new(handler),
        RpcClientConfig::default(),
    );
    server.run();
    let client = RpcClient::from_connection(
        client_end,
        "client",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default(),
    );
    client.run();

    let message = Message::new(
        client.buffer_pool(),
        FrameCommand::Notify,
        0,
        false,
        "note",
        b"prebuilt",
    )
    .unwrap();
    client
        .push_message(message.retain(), RpcTimeout::Forever)
        .await
        .unwrap();
    client.push_message(message, RpcTimeout::Forever).await.unwrap();

    assert!(eventually(|| notified.load(Ordering::SeqCst) == 2).await);
}

#[tokio::test]
async fn push_message_honours_queue_policies_and_releases_failures() {
    let counter = Arc::new(NonRecyclingBufferPool::new());
    let pool: SharedBufferPool = counter.clone();
    let (client_end, _stalled_peer) = tokio::io::duplex(16);
    let client = RpcClient::from_connection(
        client_end,
        "stalled",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default()
            .with_send_queue_size(1)
            .with_buffer_pool(pool.clone()),
    );
    client.run();

    let frame = |seq| {
        Message::new(&pool, FrameCommand::Notify, seq, false, "note", &[0u8; 256]).unwrap()
    };

    let mut saw_full = false;
    for seq in 0..50 {
        let message = frame(seq);
        let kept = message.retain();
        match client
            .push_message(message, RpcTimeout::NonBlocking)
            .await
        {
            Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(RpcClientError::QueueIsFull) => {
                assert_eq!(kept.ref_count(), 1);
                saw_full = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_full);

    let message = frame(100);
    let kept = message.retain();
    let err = client
        .push_message(message, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Timeout));
    assert_eq!(kept.ref_count(), 1);
    drop(kept);

    client.stop();
    let err = client
        .push_message(frame(101), RpcTimeout::Forever)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcClientError::Stopped));

    assert!(eventually(|| counter.outstanding() == 0).await);
}

#[tokio::test]
async fn stop_closes_a_connection_stalled_mid_write() {
    // The peer never reads, so the send loop blocks inside a write.
    let (client_end, mut peer) = tokio::io::duplex(16);
    let client = RpcClient::from_connection(
        client_end,
        "stalled",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default(),
    );
    client.run();

    client
        .notify("note", &vec![0u8; 4096], Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.stop();

    assert!(peer_sees_close(&mut peer).await);
}

#[tokio::test]
async fn stop_closes_a_connection_that_never_ran() {
    let (client_end, mut peer) = tokio::io::duplex(64);
    let client = RpcClient::from_connection(
        client_end,
        "idle",
        Arc::new(NoopMessageHandler),
        RpcClientConfig::default(),
    );

    client.stop();

    assert!(!client.is_running());
    assert!(peer_sees_close(&mut peer).await);
}

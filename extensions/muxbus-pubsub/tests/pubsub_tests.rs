use muxbus_pubsub::{
    PubSubClient, PubSubClientConfig, PubSubError, PubSubServer, ROUTE_SUBSCRIBE, Topic,
};
use muxbus_tokio_rpc_server::utils::bind_tcp_listener_on_random_port;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

const PASSWORD: &str = "s3cret";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_server() -> (Arc<PubSubServer>, String) {
    let (listener, addr) = bind_tcp_listener_on_random_port().await.unwrap();
    let server = Arc::new(PubSubServer::new(PASSWORD).await.unwrap());

    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve_with_listener(listener).await;
        }
    });

    (server, addr.to_string())
}

async fn connect(addr: &str, password: &str) -> PubSubClient {
    PubSubClient::connect(addr, PubSubClientConfig::new(password))
        .await
        .unwrap()
}

async fn authenticated(addr: &str) -> PubSubClient {
    let client = connect(addr, PASSWORD).await;
    client.authenticate().await.unwrap();
    client
}

async fn subscribed(client: &PubSubClient, name: &str) -> UnboundedReceiver<Topic> {
    let (tx, rx) = unbounded_channel();
    client
        .subscribe(name, move |topic| {
            let _ = tx.send(topic);
        })
        .await
        .unwrap();
    rx
}

async fn recv(rx: &mut UnboundedReceiver<Topic>) -> Topic {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("no push within timeout")
        .expect("handler dropped")
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn subscriber_receives_server_publish() {
    let (server, addr) = start_server().await;
    let client = authenticated(&addr).await;
    let mut rx = subscribed(&client, "news").await;

    let delivered = server.publish("news", &b"extra extra"[..]).await.unwrap();

    assert_eq!(delivered, 1);
    let topic = recv(&mut rx).await;
    assert_eq!(topic.name(), "news");
    assert_eq!(topic.payload().as_ref(), b"extra extra");
}

#[tokio::test]
async fn wrong_password_is_rejected_and_leaves_connection_unauthenticated() {
    let (_server, addr) = start_server().await;
    let client = connect(&addr, "guess").await;

    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, PubSubError::InvalidPassword));

    let err = client.subscribe("news", |_| {}).await.unwrap_err();
    assert!(matches!(err, PubSubError::Unauthenticated));
    assert!(!client.is_subscribed("news"));

    let err = client.publish("news", &b"x"[..]).await.unwrap_err();
    assert!(matches!(err, PubSubError::Unauthenticated));
}

#[tokio::test]
async fn publish_skips_the_publisher() {
    let (_server, addr) = start_server().await;
    let publisher = authenticated(&addr).await;
    let mut own_rx = subscribed(&publisher, "room").await;
    let mut others = Vec::new();
    for _ in 0..3 {
        let client = authenticated(&addr).await;
        let rx = subscribed(&client, "room").await;
        others.push((client, rx));
    }
    let bystander = authenticated(&addr).await;
    let mut bystander_rx = subscribed(&bystander, "elsewhere").await;

    publisher.publish("room", &b"hi all"[..]).await.unwrap();

    for (_, rx) in &mut others {
        assert_eq!(recv(rx).await.payload().as_ref(), b"hi all");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(own_rx.try_recv().is_err());
    assert!(bystander_rx.try_recv().is_err());
}

#[tokio::test]
async fn subscribing_twice_keeps_one_membership() {
    let (server, addr) = start_server().await;
    let client = authenticated(&addr).await;

    let _first = subscribed(&client, "news").await;
    let mut second = subscribed(&client, "news").await;

    assert_eq!(server.subscriber_count("news"), 1);

    server.publish("news", &b"once"[..]).await.unwrap();
    assert_eq!(recv(&mut second).await.payload().as_ref(), b"once");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (server, addr) = start_server().await;
    let client = authenticated(&addr).await;
    let mut rx = subscribed(&client, "news").await;

    client.unsubscribe("news").await.unwrap();
    // Unsubscribing from something never subscribed is still acknowledged.
    client.unsubscribe("never").await.unwrap();

    assert_eq!(server.subscriber_count("news"), 0);
    assert_eq!(server.publish("news", &b"gone"[..]).await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_removes_every_membership() {
    let (server, addr) = start_server().await;
    let leaving = authenticated(&addr).await;
    let _a = subscribed(&leaving, "a").await;
    let _b = subscribed(&leaving, "b").await;
    let staying = authenticated(&addr).await;
    let mut staying_rx = subscribed(&staying, "a").await;

    leaving.stop();

    assert!(eventually(|| server.subscriber_count("a") == 1 && server.subscriber_count("b") == 0).await);
    assert_eq!(server.publish("a", &b"still here"[..]).await.unwrap(), 1);
    assert_eq!(recv(&mut staying_rx).await.payload().as_ref(), b"still here");
    assert_eq!(server.publish("b", &b"nobody"[..]).await.unwrap(), 0);
}

#[tokio::test]
async fn publish_to_one_reaches_exactly_one_subscriber() {
    let (server, addr) = start_server().await;
    let mut subscribers = Vec::new();
    for _ in 0..3 {
        let client = authenticated(&addr).await;
        let rx = subscribed(&client, "jobs").await;
        subscribers.push((client, rx));
    }

    assert!(server.publish_to_one("jobs", &b"job-1"[..]).await.unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let received = subscribers
        .iter_mut()
        .filter(|(_, rx)| !rx.is_empty())
        .count();
    assert_eq!(received, 1);
}

#[tokio::test]
async fn client_publish_to_one_skips_the_publisher() {
    let (_server, addr) = start_server().await;
    let publisher = authenticated(&addr).await;
    let mut own_rx = subscribed(&publisher, "jobs").await;
    let worker = authenticated(&addr).await;
    let mut worker_rx = subscribed(&worker, "jobs").await;

    for _ in 0..5 {
        publisher.publish_to_one("jobs", &b"work"[..]).await.unwrap();
    }

    for _ in 0..5 {
        recv(&mut worker_rx).await;
    }
    assert!(own_rx.try_recv().is_err());
}

#[tokio::test]
async fn empty_topic_names_are_rejected() {
    let (_server, addr) = start_server().await;
    let client = authenticated(&addr).await;

    let err = client.subscribe("", |_| {}).await.unwrap_err();
    assert!(matches!(err, PubSubError::InvalidTopicEmpty));

    // Bypass the client-side check: a zero-length name on the wire.
    let err = client
        .rpc_client()
        .call::<[u8], ()>(ROUTE_SUBSCRIBE, &[0u8, 0][..], RECV_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        PubSubError::from(err),
        PubSubError::InvalidTopicEmpty
    ));
}

#[tokio::test]
async fn server_publish_without_subscribers_delivers_nothing() {
    let (server, _addr) = start_server().await;

    assert_eq!(server.publish("quiet", &b"..."[..]).await.unwrap(), 0);
    assert!(!server.publish_to_one("quiet", &b"..."[..]).await.unwrap());
    assert!(matches!(
        server.publish("", &b"..."[..]).await,
        Err(PubSubError::InvalidTopicEmpty)
    ));
}

use example_muxbus_pubsub_app::service_definition;
use muxbus_pubsub::{PubSubClient, PubSubClientConfig, PubSubServer};
use muxbus_tokio_rpc_server::utils::bind_tcp_listener_on_random_port;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const PASSWORD: &str = "demo-password";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Bind to a random available port
    let (listener, addr) = bind_tcp_listener_on_random_port().await?;

    let server = Arc::new(PubSubServer::new(PASSWORD).await?);
    // Plain RPC methods live next to the pub/sub routes.
    service_definition::register(&server.rpc_server().endpoint()).await?;

    let _server_task = tokio::spawn({
        let server = server.clone();
        async move {
            if let Err(err) = server.serve_with_listener(listener).await {
                tracing::error!(error = %err, "server failed");
            }
        }
    });

    let addr = addr.to_string();
    let alice = PubSubClient::connect(&addr, PubSubClientConfig::new(PASSWORD)).await?;
    let bob = PubSubClient::connect(&addr, PubSubClientConfig::new(PASSWORD)).await?;
    alice.authenticate().await?;
    bob.authenticate().await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for (name, client) in [("alice", &alice), ("bob", &bob)] {
        let tx = tx.clone();
        client
            .subscribe("news", move |topic| {
                let _ = tx.send((name, topic));
            })
            .await?;
    }
    drop(tx);

    alice.publish("news", "hello from alice").await?;
    server.publish("news", "hello from the server").await?;

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some((name, topic))) => println!(
                "{} got [{}] {}",
                name,
                topic.name(),
                String::from_utf8_lossy(topic.payload())
            ),
            _ => break,
        }
    }

    let sum = service_definition::add(
        alice.rpc_client(),
        vec![1.0, 2.0, 3.0],
        Duration::from_secs(1),
    )
    .await?;
    println!("Result from add(): {}", sum);

    alice.stop();
    bob.stop();
    server.shutdown();
    Ok(())
}

//! WebSocket Delivery Integration Tests
//!
//! Tests the full flow from publishing an event to a real WebSocket client
//! receiving it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use market_relay::{
    ConnectionRegistry, DeliveryConfig, MarketEvent, SaleEntry, WebSocketRegistry,
    WebSocketServer,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a random port.
async fn setup_test_server(
    config: DeliveryConfig,
) -> (String, Arc<WebSocketRegistry>, CancellationToken) {
    let registry = Arc::new(ConnectionRegistry::new());
    let cancel = CancellationToken::new();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = WebSocketServer::new(Arc::clone(&registry), config, cancel.clone());
    tokio::spawn(server.serve(listener));

    (format!("ws://{addr}"), registry, cancel)
}

async fn connect(url: &str, registry: &WebSocketRegistry, expected: usize) -> Client {
    let (client, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
    wait_for_connections(registry, expected).await;
    client
}

async fn wait_for_connections(registry: &WebSocketRegistry, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while registry.len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry did not reach expected size");
}

async fn next_event(client: &mut Client) -> MarketEvent {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn sales_event(item: u32, sales: usize) -> MarketEvent {
    MarketEvent::SalesAdd {
        item,
        world: 74,
        sales: (0..sales)
            .map(|i| SaleEntry {
                price_per_unit: 100 + u32::try_from(i).unwrap(),
                quantity: 1,
                hq: i % 2 == 0,
                buyer_name: format!("Buyer {i}"),
                timestamp: Utc::now(),
            })
            .collect(),
    }
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let (url, registry, cancel) = setup_test_server(DeliveryConfig::default()).await;
    let mut client = connect(&url, &registry, 1).await;

    for item in 1..=5 {
        assert_eq!(registry.publish(&sales_event(item, 1)), 1);
    }

    for item in 1..=5 {
        assert_eq!(next_event(&mut client).await.key().item_id, item);
    }

    cancel.cancel();
}

#[tokio::test]
async fn large_event_is_reassembled_from_fragments() {
    let config = DeliveryConfig {
        max_frame_bytes: 64,
        ..DeliveryConfig::default()
    };
    let (url, registry, cancel) = setup_test_server(config).await;
    let mut client = connect(&url, &registry, 1).await;

    let event = sales_event(5333, 50);
    assert!(serde_json::to_vec(&event).unwrap().len() > 64 * 10);
    registry.publish(&event);

    assert_eq!(next_event(&mut client).await, event);
    cancel.cancel();
}

#[tokio::test]
async fn every_connection_receives_event() {
    let (url, registry, cancel) = setup_test_server(DeliveryConfig::default()).await;
    let mut first = connect(&url, &registry, 1).await;
    let mut second = connect(&url, &registry, 2).await;

    assert_eq!(registry.publish(&sales_event(7, 1)), 2);

    assert_eq!(next_event(&mut first).await.key().item_id, 7);
    assert_eq!(next_event(&mut second).await.key().item_id, 7);
    cancel.cancel();
}

#[tokio::test]
async fn client_disconnect_removes_connection() {
    let (url, registry, cancel) = setup_test_server(DeliveryConfig::default()).await;
    let mut client = connect(&url, &registry, 1).await;

    client.close(None).await.unwrap();
    wait_for_connections(&registry, 0).await;

    assert_eq!(registry.publish(&sales_event(1, 1)), 0);
    cancel.cancel();
}

#[tokio::test]
async fn shutdown_sends_close_frame_with_reason() {
    let (url, registry, cancel) = setup_test_server(DeliveryConfig::default()).await;
    let mut client = connect(&url, &registry, 1).await;

    cancel.cancel();

    let close = timeout(Duration::from_secs(2), async {
        while let Some(message) = client.next().await {
            if let Ok(Message::Close(frame)) = message {
                return frame;
            }
        }
        None
    })
    .await
    .unwrap()
    .expect("expected close frame");

    assert_eq!(close.code, CloseCode::Normal);
    assert_eq!(close.reason.as_str(), "closing socket");
    wait_for_connections(&registry, 0).await;
}

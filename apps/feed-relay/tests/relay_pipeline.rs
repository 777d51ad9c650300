//! Relay Pipeline Integration Tests
//!
//! Tests the full data flow from a loopback "upstream feed" TCP server
//! through the relay to subscribers and pub/sub channels.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use feed_relay::{
    BroadcastHub, ChannelBus, Credentials, FeedSettings, PortError, PubSub, PushTransport,
    ReconnectSettings, RelayConfig, RelayError, RelayService, ServerSettings, WindowSettings,
};

// =============================================================================
// Fixtures
// =============================================================================

struct ProbeTransport {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushTransport for ProbeTransport {
    async fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        self.tx
            .send(String::from_utf8_lossy(bytes).into_owned())
            .map_err(|e| PortError::Delivery(e.to_string()))
    }
}

fn probe() -> (Arc<ProbeTransport>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ProbeTransport { tx }), rx)
}

fn test_config(port: u16) -> RelayConfig {
    RelayConfig {
        feed: FeedSettings {
            host: "127.0.0.1".to_string(),
            port,
            ..FeedSettings::default()
        },
        credentials: Credentials::new(
            "tok-123".to_string(),
            "alice".to_string(),
            "s3cret".to_string(),
        ),
        tickers: vec!["WINJ25".to_string()],
        family_prefix: "WIN".to_string(),
        reconnect: ReconnectSettings {
            delay_initial: Duration::from_millis(5),
            delay_max: Duration::from_millis(20),
            jitter_factor: 0.0,
            max_attempts: 3,
            ..ReconnectSettings::default()
        },
        window: WindowSettings::default(),
        server: ServerSettings::default(),
    }
}

/// A fake upstream feed: accepts one connection, forwards everything it
/// reads to `inbound_tx`, and writes `records` once it has seen the login
/// and subscription lines.
async fn run_upstream(
    listener: TcpListener,
    records: &'static str,
    inbound_tx: mpsc::UnboundedSender<String>,
) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 4096];
    let mut seen = String::new();

    // Login lines (3) plus the sqt line make 4 newlines.
    while seen.matches('\n').count() < 4 {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "upstream saw EOF before login completed");
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    let _ = inbound_tx.send(seen);

    socket.write_all(records.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();

    // Keep forwarding whatever else arrives until the relay closes.
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                let _ = inbound_tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            }
        }
    }
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[tokio::test]
async fn records_reach_subscribers_and_channels() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let upstream = tokio::spawn(run_upstream(
        listener,
        "T:WINJ25:102635:2:133290!T:WING25:102636:2:133300!T:PETR4:102636:2:37.5!",
        inbound_tx,
    ));

    let hub = Arc::new(BroadcastHub::new());
    let bus = Arc::new(ChannelBus::default());
    let mut raw_rx = bus.subscribe("raw");
    let mut family_rx = bus.subscribe("WIN");
    let mut max_rx = bus.subscribe("max");

    let (transport, mut records_rx) = probe();
    hub.register(transport).unwrap();

    let cancel = CancellationToken::new();
    let relay = RelayService::new(
        test_config(port),
        Arc::clone(&hub),
        pubsub(&bus),
        dummy_sampler(),
        cancel.clone(),
    );
    let relay_task = tokio::spawn(relay.run());

    // The upstream must have received the login lines and the subscription.
    let seen = timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(seen.starts_with("tok-123\nalice\ns3cret\n"));
    assert!(seen.contains("sqt WINJ25\n"));

    // Every record reaches the registered subscriber, in order.
    for expected in [
        "T:WINJ25:102635:2:133290!",
        "T:WING25:102636:2:133300!",
        "T:PETR4:102636:2:37.5!",
    ] {
        let got = timeout(Duration::from_secs(2), records_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, expected);
    }

    // Raw channel carries all three; the family channel only the WIN ones.
    for _ in 0..3 {
        timeout(Duration::from_secs(2), raw_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    let fam1 = family_rx.recv().await.unwrap();
    let fam2 = family_rx.recv().await.unwrap();
    assert!(fam1.starts_with("T:WINJ25"));
    assert!(fam2.starts_with("T:WING25"));
    assert!(family_rx.try_recv().is_err());

    // Each ticker's first trade price is a new running maximum.
    let mut max_tickers = Vec::new();
    for _ in 0..3 {
        let payload = timeout(Duration::from_secs(2), max_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        max_tickers.push(value["ticker"].as_str().unwrap().to_string());
    }
    assert_eq!(max_tickers, vec!["WINJ25", "WING25", "PETR4"]);

    cancel.cancel();
    hub.shutdown().await;
    assert!(relay_task.await.unwrap().is_ok());
    upstream.abort();
}

#[tokio::test]
async fn subscriber_requests_are_forwarded_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let upstream = tokio::spawn(run_upstream(listener, "T:WINJ25:102635:2:133290!", inbound_tx));

    let hub = Arc::new(BroadcastHub::new());
    let bus = Arc::new(ChannelBus::default());
    let (transport, mut records_rx) = probe();
    let handle = hub.register(transport).unwrap();

    let cancel = CancellationToken::new();
    let relay = RelayService::new(
        test_config(port),
        Arc::clone(&hub),
        pubsub(&bus),
        dummy_sampler(),
        cancel.clone(),
    );
    let relay_task = tokio::spawn(relay.run());

    // Session is up once the first record arrives.
    let _ = timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(2), records_rx.recv())
        .await
        .unwrap()
        .unwrap();

    handle.send_text("sqt VALE3\n");

    let forwarded = timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded, "sqt VALE3\n");

    cancel.cancel();
    hub.shutdown().await;
    assert!(relay_task.await.unwrap().is_ok());
    upstream.abort();
}

#[tokio::test]
async fn unreachable_feed_exhausts_reconnect_budget() {
    // Bind a port, then drop the listener so every connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let hub = Arc::new(BroadcastHub::new());
    let bus = Arc::new(ChannelBus::default());
    let cancel = CancellationToken::new();
    let relay = RelayService::new(
        test_config(port),
        hub,
        pubsub(&bus),
        dummy_sampler(),
        cancel,
    );

    let result = timeout(Duration::from_secs(5), relay.run()).await.unwrap();
    match result {
        Err(RelayError::ConnectExhausted { attempts, .. }) => assert!(attempts >= 3),
        other => panic!("expected exhausted reconnect budget, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_stops_relay_cleanly_while_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = test_config(port);
    config.reconnect.max_attempts = 0; // retry forever

    let hub = Arc::new(BroadcastHub::new());
    let bus = Arc::new(ChannelBus::default());
    let cancel = CancellationToken::new();
    let relay = RelayService::new(
        config,
        hub,
        pubsub(&bus),
        dummy_sampler(),
        cancel.clone(),
    );
    let relay_task = tokio::spawn(relay.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = timeout(Duration::from_secs(2), relay_task).await.unwrap();
    assert!(result.unwrap().is_ok());
}

// =============================================================================
// Helpers
// =============================================================================

fn pubsub(bus: &Arc<ChannelBus>) -> Arc<dyn PubSub> {
    Arc::<ChannelBus>::clone(bus) as Arc<dyn PubSub>
}

/// A sampler whose aggregator half is immediately dropped; samples go
/// nowhere, which is fine for pipeline tests.
fn dummy_sampler() -> feed_relay::application::services::aggregator::WindowSampler {
    let cancel = CancellationToken::new();
    let bus: Arc<dyn PubSub> = Arc::new(ChannelBus::default());
    let aggregator = feed_relay::WindowAggregator::spawn(
        feed_relay::AggregatorConfig::default(),
        bus,
        cancel.clone(),
    );
    let sampler = aggregator.sampler();
    cancel.cancel();
    sampler
}

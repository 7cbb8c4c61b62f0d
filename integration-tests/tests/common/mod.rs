//! Shared test utilities for integration tests.
//!
//! Boots the real HTTP/WebSocket router on an ephemeral port, backed by an
//! in-memory broker the tests can inspect and publish into.

#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use branch_relay::app::AppState;
use branch_relay::branch::{BranchId, PublishTarget};
use branch_relay::broker::InMemoryBroker;
use branch_relay::gate::{ConnectionGate, TokenPresenceGate};
use branch_relay::infrastructure::server;
use branch_relay::publisher::EventEnvelope;
use branch_relay::relay::RelayConfig;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(3);

/// A relay server running on localhost.
pub struct RelayServer {
    /// Bound address.
    pub addr: SocketAddr,
    /// Broker behind the server.
    pub broker: InMemoryBroker,
    /// State shared with the server.
    pub state: AppState,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RelayServer {
    /// Starts a server that accepts any non-empty token.
    pub async fn start() -> Result<Self> {
        Self::with_gate(Arc::new(TokenPresenceGate)).await
    }

    /// Starts a server with a custom gate.
    pub async fn with_gate(gate: Arc<dyn ConnectionGate>) -> Result<Self> {
        let broker = InMemoryBroker::new();
        let state = AppState::new(Arc::new(broker.clone()), gate, RelayConfig::default());
        let metrics = PrometheusBuilder::new().build_recorder().handle();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = server::router(state.clone(), metrics);

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(server::serve(listener, app, async move {
            let _ = signal.await;
        }));

        Ok(Self {
            addr,
            broker,
            state,
            shutdown,
            handle,
        })
    }

    /// Base URL for HTTP requests.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Opens a relay connection with a valid token.
    pub async fn connect(&self, branch: &str) -> Result<TestClient> {
        self.connect_with_token(branch, Some("token")).await
    }

    /// Opens a relay connection presenting `token`.
    pub async fn connect_with_token(&self, branch: &str, token: Option<&str>) -> Result<TestClient> {
        let mut url = format!("ws://{}/ws?branch_id={branch}", self.addr);
        if let Some(token) = token {
            url.push_str("&token=");
            url.push_str(token);
        }
        let (ws, _) = connect_async(url).await.context("WebSocket handshake")?;
        Ok(TestClient { ws })
    }

    /// Opens a connection to the shared channel with a valid token.
    pub async fn connect_shared(&self) -> Result<TestClient> {
        let url = format!("ws://{}/ws/shared?token=token", self.addr);
        let (ws, _) = connect_async(url).await.context("WebSocket handshake")?;
        Ok(TestClient { ws })
    }

    /// Publishes `event` to the shared channel through the server's publisher.
    pub async fn publish_shared(&self, event: &str) -> Result<()> {
        self.state
            .publisher()
            .try_publish(&PublishTarget::Shared, event, &json!({}))
            .await?;
        Ok(())
    }

    /// Publishes `event` for `branch` through the server's publisher.
    pub async fn publish(&self, branch: &str, event: &str) -> Result<()> {
        let target = PublishTarget::Branch(BranchId::new(branch)?);
        self.state
            .publisher()
            .try_publish(&target, event, &json!({ "branch": branch }))
            .await?;
        Ok(())
    }

    /// Waits until `subscribers` relays on `branch` are streaming live.
    pub async fn wait_for_live(&self, branch: &str, subscribers: usize) -> Result<()> {
        let exchange = format!("exchange_branch_{branch}");
        timeout(WAIT, async {
            while self.broker.bindings(&exchange).len() < subscribers {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .context("relays did not reach live streaming")
    }

    /// Waits until no relay is subscribed to `branch` and every broker channel is closed.
    pub async fn wait_for_release(&self, branch: &str) -> Result<()> {
        let exchange = format!("exchange_branch_{branch}");
        timeout(WAIT, async {
            while !self.broker.bindings(&exchange).is_empty() || self.broker.open_channels() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .context("relay resources were not released")
    }

    /// Triggers graceful shutdown and waits for the server to stop.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(WAIT, self.handle).await.context("server shutdown")??
    }
}

/// Client side of one relay connection.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn next_frame(&mut self) -> Result<Message> {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .context("no frame within deadline")?
                .context("stream ended")??;
            if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
                return Ok(message);
            }
        }
    }

    /// Receives the next event and returns its type.
    pub async fn next_event(&mut self) -> Result<String> {
        match self.next_frame().await? {
            Message::Text(text) => {
                let envelope: EventEnvelope = serde_json::from_str(text.as_str())?;
                Ok(envelope.event)
            }
            other => bail!("expected text frame, got {other:?}"),
        }
    }

    /// Receives the close frame and returns its code.
    pub async fn expect_close(&mut self) -> Result<u16> {
        match self.next_frame().await? {
            Message::Close(Some(frame)) => Ok(u16::from(frame.code)),
            other => bail!("expected close frame, got {other:?}"),
        }
    }

    /// Asserts that no event arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<()> {
        match timeout(window, self.next_frame()).await {
            Err(_) => Ok(()),
            Ok(frame) => bail!("expected silence, got {frame:?}"),
        }
    }

    /// Closes the connection from the client side.
    pub async fn hang_up(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

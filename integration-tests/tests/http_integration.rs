//! Integration tests for the HTTP control surface.

use anyhow::Result;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;

mod common;

use common::RelayServer;

/// Liveness is unconditional; readiness follows broker reachability.
#[tokio::test]
async fn test_health_probes() -> Result<()> {
    let server = RelayServer::start().await?;
    let client = reqwest::Client::new();

    let live = client.get(server.http_url("/health/live")).send().await?;
    assert_eq!(live.status(), 200);
    assert_eq!(live.text().await?, "OK");

    let ready = client.get(server.http_url("/health/ready")).send().await?;
    assert_eq!(ready.status(), 200);

    server.broker.set_unreachable(true);
    let ready = client.get(server.http_url("/health/ready")).send().await?;
    assert_eq!(ready.status(), 503);

    let live = client.get(server.http_url("/health/live")).send().await?;
    assert_eq!(live.status(), 200);
    Ok(())
}

/// The Prometheus endpoint answers.
#[tokio::test]
async fn test_metrics_endpoint() -> Result<()> {
    let server = RelayServer::start().await?;

    let response = reqwest::get(server.http_url("/metrics")).await?;
    assert_eq!(response.status(), 200);
    Ok(())
}

/// Upgrades without a usable branch id are refused at the HTTP layer.
#[tokio::test]
async fn test_upgrade_requires_branch_id() -> Result<()> {
    let server = RelayServer::start().await?;

    for query in ["", "?branch_id=", "?branch_id=%20%20"] {
        let url = format!("ws://{}/ws{query}", server.addr);
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 400),
            Err(e) => anyhow::bail!("expected HTTP 400 for {query:?}, got {e}"),
            Ok(_) => anyhow::bail!("expected HTTP 400 for {query:?}, got an upgrade"),
        }
    }
    Ok(())
}

/// Graceful shutdown completes once signalled.
#[tokio::test]
async fn test_graceful_shutdown() -> Result<()> {
    let server = RelayServer::start().await?;
    let addr = server.addr;

    server.shutdown().await?;

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    Ok(())
}

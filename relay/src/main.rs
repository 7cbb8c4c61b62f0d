//! Branch Relay server binary entry point.

use branch_relay::app::AppState;
use branch_relay::broker::{AmqpConnector, BrokerConnector, InMemoryBroker};
use branch_relay::gate::{ConnectionGate, SharedSecretGate, TokenPresenceGate};
use branch_relay::infrastructure::config::{BrokerMode, Settings};
use branch_relay::infrastructure::{audit, server, telemetry::TelemetryBuilder};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new()?;

    TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION")).init()?;

    info!("Branch Relay Starting...");
    audit::log_audit(&audit::AuditEvent::SystemStartup {
        component: "Relay".into(),
    });

    let connector: Arc<dyn BrokerConnector> = match config.broker.mode {
        BrokerMode::Amqp => {
            info!(host = %config.broker.host, port = config.broker.port, "Using AMQP broker");
            Arc::new(AmqpConnector::new(
                config.broker.dsn(),
                config.broker.retry_policy(),
            ))
        }
        BrokerMode::Memory => {
            warn!("Using in-memory broker; backlog is lost on restart");
            Arc::new(InMemoryBroker::new())
        }
    };

    let gate: Arc<dyn ConnectionGate> = match config.gate.shared_token.clone() {
        Some(secret) => Arc::new(SharedSecretGate::new(secret)),
        None => {
            warn!("No shared token configured; accepting any non-empty token");
            Arc::new(TokenPresenceGate)
        }
    };

    let state = AppState::new(connector, gate, config.relay.relay_config());

    server::run_server(&config, state, shutdown_signal()).await?;

    info!("Shutdown signal received, cleaning up...");
    audit::log_audit(&audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    info!("Branch Relay Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

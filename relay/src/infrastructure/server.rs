use crate::app::AppState;
use crate::infrastructure::config::{BindAddress, Settings};
use crate::ws::ws_router;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use tokio::net::TcpListener;

async fn health_check() -> &'static str {
    "OK"
}

/// Ready once a broker channel can be opened.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.connector().open_channel().await {
        Ok(channel) => {
            if let Err(e) = channel.close().await {
                tracing::debug!(error = %e, "readiness probe channel close failed");
            }
            (StatusCode::OK, "OK")
        }
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "broker unavailable")
        }
    }
}

/// Builds the full HTTP surface: health probes, metrics and the relay endpoint.
pub fn router(state: AppState, metrics: PrometheusHandle) -> Router {
    let control_plane = Router::new()
        .route("/health/live", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(move || std::future::ready(metrics.render())))
        .with_state(state.clone());

    control_plane.merge(ws_router(state))
}

/// Serves `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    tracing::info!("Relay listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Installs the Prometheus recorder and runs the relay server.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed, the address cannot
/// be bound, or the server fails while running.
pub async fn run_server(
    config: &Settings,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))?;

    let addr = BindAddress(config.server.host.clone(), config.server.port).to_socket_addr()?;
    let listener = TcpListener::bind(addr).await?;

    serve(listener, router(state, handle), shutdown).await
}

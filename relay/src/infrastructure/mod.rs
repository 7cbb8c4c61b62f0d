/// Audit logging for security events.
pub mod audit;
/// Configuration management for the relay.
pub mod config;
/// HTTP server: relay endpoint, health and metrics.
pub mod server;
/// Telemetry setup for logging, tracing, and metrics.
pub mod telemetry;

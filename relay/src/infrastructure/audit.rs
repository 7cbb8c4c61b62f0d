use serde::Serialize;
use tracing::{info, info_span};

/// Security-relevant relay event.
/// Serialized as JSON so audit sinks can parse it.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The service came up.
    SystemStartup {
        /// Component that started.
        component: String,
    },
    /// The service is going down.
    SystemShutdown {
        /// Why it stopped.
        reason: String,
    },
    /// A relay connection was refused by the gate.
    AccessDenied {
        /// Connection that was refused.
        connection_id: String,
        /// Channel the client asked for, `branch:{id}` or `shared`.
        channel: String,
        /// Gate verdict.
        reason: String,
    },
}

/// Logs an audit event on the `audit` target as structured JSON.
/// Subscribers can filter on that target to route audit records separately.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Security Audit Event");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_serializes_with_tag() {
        let event = AuditEvent::AccessDenied {
            connection_id: "c1".into(),
            channel: "branch:42".into(),
            reason: "missing auth token".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "access_denied");
        assert_eq!(json["channel"], "branch:42");
    }

    #[test]
    fn log_audit_variants() {
        log_audit(&AuditEvent::SystemStartup {
            component: "relay".into(),
        });
        log_audit(&AuditEvent::SystemShutdown {
            reason: "test".into(),
        });
    }
}

//! Fatal-failure notifications.
//!
//! On any fatal error the engine emits one structured event. It is always
//! echoed to stderr; when a webhook URL is configured the event is also
//! POSTed there as JSON. Delivery beyond the POST (chat, email, paging) is
//! someone else's job, and a webhook failure never masks the original error.

use serde::Serialize;

use crate::store::shared_client;

/// The event shape consumers receive.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub run_id: String,
    /// Machine-readable error tag, e.g. `lock_held`.
    pub kind: String,
    pub message: String,
}

impl FailureEvent {
    pub fn new(
        run_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub struct Notifier {
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self { webhook_url }
    }

    /// Best-effort emit: never fails, never panics.
    pub fn emit(&self, event: &FailureEvent) {
        eprintln!(
            "  \x1b[31mFailed\x1b[0m run {} [{}]: {}",
            event.run_id, event.kind, event.message
        );

        if let Some(url) = &self.webhook_url {
            let result = shared_client().post(url).json(event).send();
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    eprintln!(
                        "  \x1b[33mWarning:\x1b[0m webhook returned HTTP {}",
                        response.status()
                    );
                }
                Err(e) => {
                    eprintln!("  \x1b[33mWarning:\x1b[0m webhook delivery failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_serializes_flat() {
        let event = FailureEvent::new("run-9", "lock_held", "another migration run is active");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["run_id"], "run-9");
        assert_eq!(value["kind"], "lock_held");
        assert_eq!(value["message"], "another migration run is active");
    }

    #[test]
    fn test_emit_without_webhook_is_silent_success() {
        let notifier = Notifier::new(None);
        notifier.emit(&FailureEvent::new("run-1", "backup_failed", "disk full"));
    }
}

//! Collaborator seams owned elsewhere in the platform.
//!
//! The core never performs file I/O or outbound network calls itself; it
//! talks to these traits and ships logging/shape-checking defaults so the
//! service runs standalone.
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Outbound win/payment notifications. Delivery (email/SMS) is owned by the
/// messaging service.
pub trait NotificationSender: Send + Sync {
    fn notify(&self, participant_id: Uuid, template: &str, data: Value);
}

/// Validates an uploaded receipt reference before it is attached to a
/// purchase. Storage is owned by the upload service; the core only ever sees
/// URLs.
pub trait ReceiptStorage: Send + Sync {
    fn resolve(&self, url: &str) -> bool;
}

pub struct LogNotifier;

impl NotificationSender for LogNotifier {
    fn notify(&self, participant_id: Uuid, template: &str, data: Value) {
        info!("notify participant={participant_id} template={template} data={data}");
    }
}

/// Accepts any http(s) URL with a non-empty remainder.
pub struct UrlShapeReceipts;

impl ReceiptStorage for UrlShapeReceipts {
    fn resolve(&self, url: &str) -> bool {
        url.strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty())
    }
}

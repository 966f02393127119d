//! Outbound webhooks: every bus event is queued as a delivery task,
//! HMAC-signed and POSTed to the merchant URL.

pub mod service;
pub mod signature;
pub mod worker;

pub use service::WebhookService;
pub use signature::{sign_payload, verify_signature};
pub use worker::FireWebhookHandler;

use std::sync::Arc;

use crate::events::Listener;
use crate::jobs::Enqueuer;

/// Default header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Bridges the bus to the queue: every event becomes a webhook delivery
/// task, so delivery retries never block bus listeners.
pub fn webhook_listener(enqueuer: Arc<Enqueuer>) -> Listener {
    Arc::new(move |name, payload| {
        let enqueuer = Arc::clone(&enqueuer);
        Box::pin(async move { enqueuer.fire_webhook(name.as_str(), &payload).await })
    })
}

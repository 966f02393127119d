//! Webhook sender: builds the event envelope, signs the body and POSTs it
//! to the merchant URL.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::signature::sign_payload;
use super::SIGNATURE_HEADER;
use crate::error::Error;

/// The envelope POSTed to the merchant.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope<'a> {
    /// Wire name of the event.
    pub event: &'a str,
    /// Unique id of this event occurrence.
    pub event_id: Uuid,
    /// Identifies the webhook configuration that produced the delivery.
    #[serde(skip_serializing_if = "str::is_empty")]
    pub webhook_id: &'a str,
    /// The event payload.
    pub data: &'a serde_json::Value,
}

/// HTTP webhook sender.
#[derive(Debug, Clone)]
pub struct WebhookService {
    client: reqwest::Client,
    signature_header: String,
    secret: Vec<u8>,
    webhook_uri: String,
    webhook_id: String,
}

impl WebhookService {
    /// Creates a sender for the merchant URL with the given signing
    /// secret and a 10 second request timeout.
    #[must_use]
    pub fn new(webhook_uri: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            signature_header: SIGNATURE_HEADER.into(),
            secret: secret.into(),
            webhook_uri: webhook_uri.into(),
            webhook_id: String::new(),
        }
    }

    /// Overrides the signature header name.
    #[must_use]
    pub fn with_signature_header(mut self, header: impl Into<String>) -> Self {
        self.signature_header = header.into();
        self
    }

    /// Sets the webhook id reported in the envelope.
    #[must_use]
    pub fn with_webhook_id(mut self, id: impl Into<String>) -> Self {
        self.webhook_id = id.into();
        self
    }

    /// Overrides the HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Delivers one event occurrence. Any non-2xx answer is an [`Error::Io`]
    /// so the queue retries it.
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] when no webhook URI is configured, [`Error::Io`]
    /// for transport failures and non-2xx responses.
    pub async fn fire_event(
        &self,
        event: &str,
        event_id: Uuid,
        data: &serde_json::Value,
    ) -> Result<(), Error> {
        if self.webhook_uri.is_empty() {
            return Err(Error::Fatal("webhook uri is not configured".into()));
        }
        let envelope = WebhookEnvelope {
            event,
            event_id,
            webhook_id: &self.webhook_id,
            data,
        };
        let body = serde_json::to_vec(&envelope).map_err(|e| Error::Fatal(e.to_string()))?;
        let signature = sign_payload(&body, &self.secret)?;

        let response = self
            .client
            .post(&self.webhook_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(&self.signature_header, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Io(format!("webhook delivery: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Io(format!(
                "webhook delivery answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::verify_signature;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[tokio::test]
    async fn delivery_carries_a_verifiable_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let service = WebhookService::new(format!("{}/hooks", server.uri()), b"secret".to_vec());
        service
            .fire_event(
                "payment.succeeded",
                Uuid::new_v4(),
                &json!({"payment_id": "p-1"}),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let request: &Request = &requests[0];
        let signature = request
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        verify_signature(&request.body, signature, b"secret").unwrap();

        let envelope: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(envelope["event"], "payment.succeeded");
        assert_eq!(envelope["data"]["payment_id"], "p-1");
        assert!(envelope["event_id"].is_string());
    }

    #[tokio::test]
    async fn non_2xx_is_a_retryable_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let service = WebhookService::new(server.uri(), b"secret".to_vec());
        let err = service
            .fire_event("payment.created", Uuid::new_v4(), &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

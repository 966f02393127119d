//! JSON error envelope for the HTTP surface.
//!
//! Every error answers as `{code, error, message, request_id}`; validation
//! failures answer 412 with field-level detail.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use checkout::Error;

/// Request id propagated from the middleware into error envelopes.
#[derive(Debug, Clone, Default)]
pub struct RequestId(pub String);

/// An HTTP-mapped error, ready to answer a request.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    request_id: Option<String>,
    fields: Option<BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    code: u16,
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, String>>,
}

impl ApiError {
    /// An error with an explicit status and message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            request_id: None,
            fields: None,
        }
    }

    /// A 412 validation failure with per-field messages.
    #[must_use]
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        Self {
            status: StatusCode::PRECONDITION_FAILED,
            message: "validation failed".into(),
            request_id: None,
            fields: Some(fields),
        }
    }

    /// A plain 404.
    #[must_use]
    pub fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    /// A plain 401.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated")
    }

    /// Attaches the request id for the envelope.
    #[must_use]
    pub fn with_request_id(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.0.clone());
        self
    }

    /// The mapped status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidRequest(_) | Error::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::SwapUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::ValidationMismatch(_)
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal detail stays in the logs, not in the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "internal error");
            "internal server error".to_owned()
        } else {
            err.to_string()
        };
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            code: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("error"),
            message: &self.message,
            request_id: self.request_id.as_deref(),
            fields: self.fields.as_ref(),
        };
        (self.status, Json(&envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_documented_statuses() {
        assert_eq!(
            ApiError::from(Error::InvalidRequest("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::NotFound("payment")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(Error::Conflict("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(Error::LedgerUnavailable("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(Error::SwapUnavailable("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(Error::Fatal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_answers_precondition_failed() {
        let mut fields = BTreeMap::new();
        fields.insert("amount".into(), "must be greater than zero".into());
        assert_eq!(
            ApiError::validation(fields).status(),
            StatusCode::PRECONDITION_FAILED
        );
    }
}

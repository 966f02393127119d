//! Route handlers for the merchant API and the buyer checkout flow.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use checkout::payments::mints;
use checkout::{AttemptDraft, NewPayment, Payment, PaymentService};
use checkout_svm::swap::{ExchangeRateParams, Rate, SwapMode};
use checkout_svm::SwapClient;

use crate::error::{ApiError, RequestId};

/// Shared state of the payment routes.
#[derive(Clone)]
pub struct AppState {
    /// The decorated payment service.
    pub service: Arc<dyn PaymentService>,
    /// The swap quote capability (exchange rates).
    pub swap: Arc<dyn SwapClient>,
    /// Product name shown in buyer wallets.
    pub app_name: String,
    /// Absolute URI of the product icon shown in buyer wallets.
    pub app_icon: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

/// Body of `POST /`.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    amount: u64,
    #[serde(default)]
    message: Option<String>,
    /// Lifetime in seconds; the configured default when unset.
    #[serde(default)]
    ttl: Option<i64>,
}

impl CreatePaymentRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut fields = BTreeMap::new();
        if self.amount == 0 {
            fields.insert("amount".into(), "must be greater than zero".into());
        }
        if let Some(external_id) = &self.external_id {
            if external_id.is_empty() || external_id.len() > 50 {
                fields.insert("external_id".into(), "must be 1 to 50 characters".into());
            }
        }
        if let Some(message) = &self.message {
            if message.len() < 2 || message.len() > 100 {
                fields.insert("message".into(), "must be 2 to 100 characters".into());
            }
        }
        if let Some(ttl) = self.ttl {
            if !(0..=86_400).contains(&ttl) {
                fields.insert("ttl".into(), "must be between 0 and 86400 seconds".into());
            }
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(fields))
        }
    }
}

/// Payment wrapper common to the read endpoints.
#[derive(Debug, Serialize)]
pub struct PaymentEnvelope {
    payment: Payment,
}

/// `POST /` — creates a payment.
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentEnvelope>), ApiError> {
    request
        .validate()
        .map_err(|err| err.with_request_id(&request_id))?;
    let expires_at = request
        .ttl
        .filter(|ttl| *ttl > 0)
        .map(|ttl| Utc::now() + chrono::Duration::seconds(ttl));
    let payment = state
        .service
        .create_payment(NewPayment {
            external_id: request.external_id,
            destination_wallet: None,
            destination_mint: None,
            amount: request.amount,
            message: request.message,
            expires_at,
        })
        .await
        .map_err(|err| ApiError::from(err).with_request_id(&request_id))?;
    Ok((StatusCode::CREATED, Json(PaymentEnvelope { payment })))
}

/// `GET /pid/{id}` — fetches a payment.
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentEnvelope>, ApiError> {
    let payment = state
        .service
        .get_payment(id)
        .await
        .map_err(|err| ApiError::from(err).with_request_id(&request_id))?;
    Ok(Json(PaymentEnvelope { payment }))
}

/// `GET /ext/{external_id}` — fetches a payment by external id.
pub async fn get_payment_by_external_id(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(external_id): Path<String>,
) -> Result<Json<PaymentEnvelope>, ApiError> {
    let payment = state
        .service
        .get_payment_by_external_id(&external_id)
        .await
        .map_err(|err| ApiError::from(err).with_request_id(&request_id))?;
    Ok(Json(PaymentEnvelope { payment }))
}

/// `POST /pid/{id}/cancel` — cancels a payment.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .cancel_payment(id)
        .await
        .map_err(|err| ApiError::from(err).with_request_id(&request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body of `POST /pid/{id}/link`.
#[derive(Debug, Deserialize)]
pub struct GenerateLinkRequest {
    #[serde(default)]
    mint: Option<String>,
    #[serde(default)]
    apply_bonus: bool,
}

/// Response of `POST /pid/{id}/link`.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    link: String,
}

/// `POST /pid/{id}/link` — builds the buyer deep link.
pub async fn generate_link(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(request): Json<GenerateLinkRequest>,
) -> Result<Json<LinkResponse>, ApiError> {
    let link = state
        .service
        .generate_link(id, request.mint, request.apply_bonus)
        .await
        .map_err(|err| ApiError::from(err).with_request_id(&request_id))?;
    Ok(Json(LinkResponse { link }))
}

/// Body of `POST /pid/{id}/transaction`.
#[derive(Debug, Deserialize)]
pub struct BuildTransactionRequest {
    account: String,
    #[serde(default)]
    mint: Option<String>,
    #[serde(default)]
    apply_bonus: bool,
}

/// Response carrying a serialized transaction for the buyer to sign.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn build_attempt_response(
    state: &AppState,
    request_id: &RequestId,
    draft: AttemptDraft,
) -> Result<Json<TransactionResponse>, ApiError> {
    if draft.source_wallet.is_empty() {
        let mut fields = BTreeMap::new();
        fields.insert("account".into(), "is required".into());
        return Err(ApiError::validation(fields).with_request_id(request_id));
    }
    let built = state
        .service
        .build_attempt(draft)
        .await
        .map_err(|err| ApiError::from(err).with_request_id(request_id))?;
    Ok(Json(TransactionResponse {
        transaction: built.transaction,
        message: built.attempt.message,
    }))
}

/// `POST /pid/{id}/transaction` — builds an attempt for a buyer wallet.
pub async fn build_transaction(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(request): Json<BuildTransactionRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    build_attempt_response(
        &state,
        &request_id,
        AttemptDraft {
            payment_id: id,
            source_wallet: request.account,
            source_mint: request.mint,
            apply_bonus: request.apply_bonus,
        },
    )
    .await
}

/// Body of `POST /exchange`.
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    #[serde(rename = "in")]
    input: String,
    #[serde(rename = "out")]
    output: String,
    amount: u64,
    mode: SwapMode,
}

/// `POST /exchange` — proxies an exchange rate quote.
pub async fn exchange_rate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Json<Rate>, ApiError> {
    let rate = state
        .swap
        .exchange_rate(ExchangeRateParams {
            input_mint: mints::mint_address(&request.input, ""),
            output_mint: mints::mint_address(&request.output, ""),
            amount: request.amount,
            mode: request.mode,
        })
        .await
        .map_err(|err| ApiError::from(checkout::Error::from(err)).with_request_id(&request_id))?;
    Ok(Json(rate))
}

/// Wallet-facing app info, per the interactive deep-link flow.
#[derive(Debug, Serialize)]
pub struct AppInfoResponse {
    label: String,
    icon: String,
}

/// `GET /checkout/{id}/{mint}/{apply_bonus}` — app info for the wallet.
pub async fn checkout_info(State(state): State<AppState>) -> Json<AppInfoResponse> {
    Json(AppInfoResponse {
        label: state.app_name.clone(),
        icon: state.app_icon.clone(),
    })
}

/// Body of the unauthenticated checkout POST.
#[derive(Debug, Deserialize)]
pub struct CheckoutTransactionRequest {
    account: String,
}

/// `POST /checkout/{id}/{mint}/{apply_bonus}` — builds the attempt for
/// the wallet that followed the deep link.
pub async fn checkout_transaction(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((id, mint, apply_bonus)): Path<(Uuid, String, bool)>,
    Json(request): Json<CheckoutTransactionRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    build_attempt_response(
        &state,
        &request_id,
        AttemptDraft {
            payment_id: id,
            source_wallet: request.account,
            source_mint: Some(mint),
            apply_bonus,
        },
    )
    .await
}

/// `GET /health` — liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

//! OAuth2 client-credentials auth: token issuance, refresh, and the
//! bearer middleware guarding the merchant routes.
//!
//! Tokens are opaque ids bound to the signing key by an HMAC tail, so a
//! forged token is rejected before the storage lookup. Liveness and
//! expiry live in the `tokens` table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use axum::{Form, Json};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use checkout::Error;

use crate::error::{ApiError, RequestId};

type HmacSha256 = Hmac<Sha256>;

/// A stored access/refresh token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Access token id.
    pub access_id: Uuid,
    /// Refresh token id.
    pub refresh_id: Uuid,
    /// The client credential the pair was issued to.
    pub credential: String,
    /// Access token expiry.
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token expiry.
    pub refresh_expires_at: DateTime<Utc>,
}

/// Storage of issued token pairs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persists a freshly issued pair.
    async fn store(&self, pair: &TokenPair) -> Result<(), Error>;
    /// Looks up a pair by access id.
    async fn get_by_access(&self, access_id: Uuid) -> Result<Option<TokenPair>, Error>;
    /// Looks up a pair by refresh id.
    async fn get_by_refresh(&self, refresh_id: Uuid) -> Result<Option<TokenPair>, Error>;
    /// Deletes a pair by refresh id (rotation).
    async fn delete_by_refresh(&self, refresh_id: Uuid) -> Result<(), Error>;
    /// Deletes every fully expired pair.
    async fn delete_expired(&self) -> Result<(), Error>;
}

/// [`TokenStore`] over the `tokens` table.
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: sqlx::PgPool,
}

impl PgTokenStore {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    access_id: Uuid,
    refresh_id: Uuid,
    credential: String,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
}

impl From<TokenRow> for TokenPair {
    fn from(row: TokenRow) -> Self {
        Self {
            access_id: row.access_id,
            refresh_id: row.refresh_id,
            credential: row.credential,
            access_expires_at: row.access_expires_at,
            refresh_expires_at: row.refresh_expires_at,
        }
    }
}

const SELECT_TOKEN: &str =
    "SELECT access_id, refresh_id, credential, access_expires_at, refresh_expires_at FROM tokens";

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn store(&self, pair: &TokenPair) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO tokens (access_id, refresh_id, credential, access_expires_at, refresh_expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(pair.access_id)
        .bind(pair.refresh_id)
        .bind(&pair.credential)
        .bind(pair.access_expires_at)
        .bind(pair.refresh_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_access(&self, access_id: Uuid) -> Result<Option<TokenPair>, Error> {
        let row: Option<TokenRow> =
            sqlx::query_as(&format!("{SELECT_TOKEN} WHERE access_id = $1"))
                .bind(access_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_refresh(&self, refresh_id: Uuid) -> Result<Option<TokenPair>, Error> {
        let row: Option<TokenRow> =
            sqlx::query_as(&format!("{SELECT_TOKEN} WHERE refresh_id = $1"))
                .bind(refresh_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_by_refresh(&self, refresh_id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM tokens WHERE refresh_id = $1")
            .bind(refresh_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<(), Error> {
        sqlx::query("DELETE FROM tokens WHERE refresh_expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Auth configuration and token store, shared by the oauth endpoint and
/// the bearer middleware.
#[derive(Clone)]
pub struct AuthState {
    store: Arc<dyn TokenStore>,
    client_id: String,
    client_secret: String,
    signing_key: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("client_id", &self.client_id)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Creates the auth state.
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        signing_key: impl Into<Vec<u8>>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            signing_key: signing_key.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    fn sign(&self, id: Uuid) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::Fatal(format!("oauth signing key: {e}")))?;
        mac.update(id.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn encode_token(&self, id: Uuid) -> Result<String, Error> {
        Ok(format!("{}.{}", id.as_simple(), self.sign(id)?))
    }

    /// Splits and verifies a token's HMAC tail; returns the embedded id.
    fn decode_token(&self, token: &str) -> Option<Uuid> {
        let (id, signature) = token.split_once('.')?;
        let id: Uuid = id.parse().ok()?;
        let expected = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).ok()?;
        mac.update(id.as_bytes());
        mac.verify_slice(&expected).ok()?;
        Some(id)
    }

    /// Compares a candidate against a configured secret in constant time
    /// by folding both through the signing-key MAC, so no byte-position
    /// timing leaks over repeated grant requests.
    fn secrets_match(&self, candidate: &[u8], expected: &[u8]) -> bool {
        let tag = {
            let Ok(mut mac) = HmacSha256::new_from_slice(&self.signing_key) else {
                return false;
            };
            mac.update(expected);
            mac.finalize().into_bytes()
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.signing_key) else {
            return false;
        };
        mac.update(candidate);
        mac.verify_slice(&tag).is_ok()
    }

    fn verify_client(&self, client_id: &str, client_secret: &str) -> bool {
        client_id == self.client_id
            && self.secrets_match(client_secret.as_bytes(), self.client_secret.as_bytes())
    }

    async fn issue(&self) -> Result<TokenResponse, Error> {
        let pair = TokenPair {
            access_id: Uuid::new_v4(),
            refresh_id: Uuid::new_v4(),
            credential: self.client_id.clone(),
            access_expires_at: Utc::now()
                + chrono::Duration::from_std(self.access_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            refresh_expires_at: Utc::now()
                + chrono::Duration::from_std(self.refresh_ttl)
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
        };
        self.store.store(&pair).await?;
        Ok(TokenResponse {
            access_token: self.encode_token(pair.access_id)?,
            refresh_token: self.encode_token(pair.refresh_id)?,
            token_type: "Bearer",
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Checks a bearer token end to end: signature, liveness, expiry.
    async fn authorize(&self, token: &str) -> Result<(), Error> {
        let access_id = self.decode_token(token).ok_or(Error::Unauthenticated)?;
        let pair = self
            .store
            .get_by_access(access_id)
            .await?
            .ok_or(Error::Unauthenticated)?;
        if pair.access_expires_at < Utc::now() {
            return Err(Error::Unauthenticated);
        }
        Ok(())
    }
}

/// Request body of `POST /oauth/token`.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    grant_type: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: String,
}

/// Response body of `POST /oauth/token`.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_in: u64,
}

/// `POST /oauth/token` — client-credentials and refresh-token grants.
///
/// # Errors
///
/// 401 for bad credentials or an unknown/expired refresh token, 412 for
/// an unsupported grant type.
pub async fn issue_token(
    State(auth): State<AuthState>,
    axum::Extension(request_id): axum::Extension<RequestId>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let fail = |err: ApiError| err.with_request_id(&request_id);
    match request.grant_type.as_str() {
        "client_credentials" => {
            if !auth.verify_client(&request.client_id, &request.client_secret) {
                return Err(fail(ApiError::unauthenticated()));
            }
            auth.issue().await.map(Json).map_err(|e| fail(e.into()))
        }
        "refresh_token" => {
            let refresh_id = auth
                .decode_token(&request.refresh_token)
                .ok_or_else(|| fail(ApiError::unauthenticated()))?;
            let pair = auth
                .store
                .get_by_refresh(refresh_id)
                .await
                .map_err(|e| fail(e.into()))?
                .ok_or_else(|| fail(ApiError::unauthenticated()))?;
            if pair.refresh_expires_at < Utc::now() {
                return Err(fail(ApiError::unauthenticated()));
            }
            auth.store
                .delete_by_refresh(refresh_id)
                .await
                .map_err(|e| fail(e.into()))?;
            auth.issue().await.map(Json).map_err(|e| fail(e.into()))
        }
        other => {
            let mut fields = BTreeMap::new();
            fields.insert("grant_type".into(), format!("unsupported grant {other}"));
            Err(fail(ApiError::validation(fields)))
        }
    }
}

/// Bearer middleware for the merchant routes.
pub async fn require_bearer(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_default();
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated().with_request_id(&request_id))?;
    auth.authorize(token)
        .await
        .map_err(|_| ApiError::unauthenticated().with_request_id(&request_id))?;
    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory [`TokenStore`].
    #[derive(Debug, Default)]
    pub struct MemTokenStore {
        pairs: Mutex<HashMap<Uuid, TokenPair>>,
    }

    #[async_trait]
    impl TokenStore for MemTokenStore {
        async fn store(&self, pair: &TokenPair) -> Result<(), Error> {
            self.pairs
                .lock()
                .expect("poisoned")
                .insert(pair.access_id, pair.clone());
            Ok(())
        }

        async fn get_by_access(&self, access_id: Uuid) -> Result<Option<TokenPair>, Error> {
            Ok(self
                .pairs
                .lock()
                .expect("poisoned")
                .get(&access_id)
                .cloned())
        }

        async fn get_by_refresh(&self, refresh_id: Uuid) -> Result<Option<TokenPair>, Error> {
            Ok(self
                .pairs
                .lock()
                .expect("poisoned")
                .values()
                .find(|pair| pair.refresh_id == refresh_id)
                .cloned())
        }

        async fn delete_by_refresh(&self, refresh_id: Uuid) -> Result<(), Error> {
            self.pairs
                .lock()
                .expect("poisoned")
                .retain(|_, pair| pair.refresh_id != refresh_id);
            Ok(())
        }

        async fn delete_expired(&self) -> Result<(), Error> {
            let now = Utc::now();
            self.pairs
                .lock()
                .expect("poisoned")
                .retain(|_, pair| pair.refresh_expires_at >= now);
            Ok(())
        }
    }
}

//! HTTP surface of the checkout service: the merchant API behind OAuth2
//! bearer auth, the unauthenticated buyer checkout flow, and per-payment
//! websocket event streams.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{self, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod auth;
pub mod broadcaster;
pub mod error;
pub mod handlers;

pub use auth::{AuthState, PgTokenStore, TokenStore};
pub use broadcaster::Broadcaster;
pub use error::{ApiError, RequestId};
pub use handlers::AppState;

/// Request body cap, 1 MiB.
const BODY_LIMIT: usize = 1 << 20;

/// Default per-request timeout; websocket sessions are exempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Assigns every request an id, exposed to handlers via extension and to
/// clients via the `x-request-id` response header.
async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Builds the full application router with the default request timeout.
#[must_use]
pub fn router(state: AppState, auth_state: AuthState, hub: Arc<Broadcaster>) -> Router {
    router_with_timeout(state, auth_state, hub, DEFAULT_REQUEST_TIMEOUT)
}

/// Builds the full application router. Every route except the websocket
/// stream answers within `request_timeout`.
#[must_use]
pub fn router_with_timeout(
    state: AppState,
    auth_state: AuthState,
    hub: Arc<Broadcaster>,
    request_timeout: Duration,
) -> Router {
    let authorized = Router::new()
        .route("/", post(handlers::create_payment))
        .route("/pid/{id}", get(handlers::get_payment))
        .route("/ext/{external_id}", get(handlers::get_payment_by_external_id))
        .route("/pid/{id}/cancel", post(handlers::cancel_payment))
        .route("/pid/{id}/link", post(handlers::generate_link))
        .route("/pid/{id}/transaction", post(handlers::build_transaction))
        .route("/exchange", post(handlers::exchange_rate))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_bearer,
        ))
        .with_state(state.clone());

    let open = Router::new()
        .route(
            "/checkout/{id}/{mint}/{apply_bonus}",
            get(handlers::checkout_info).post(handlers::checkout_transaction),
        )
        .with_state(state);

    let oauth = Router::new()
        .route("/oauth/token", post(auth::issue_token))
        .with_state(auth_state);

    let ws = Router::new()
        .route("/ws/channel/{payment_id}", any(broadcaster::ws_handler))
        .with_state(hub);

    Router::new()
        .merge(authorized)
        .merge(open)
        .merge(oauth)
        .route("/health", get(handlers::health))
        .layer(TimeoutLayer::new(request_timeout))
        .merge(ws)
        .layer(middleware::from_fn(request_id))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use checkout::repository::mem::MemRepository;
    use checkout::{Emitter, PaymentConfig, Service, ServiceEvents};
    use checkout_svm::testing::{MemoryLedger, MemorySwap};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let core = Service::new(
            Arc::new(MemRepository::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySwap::new()),
            PaymentConfig {
                apply_bonus: false,
                bonus_mint: String::new(),
                bonus_authority: None,
                max_apply_bonus_amount: 0,
                max_apply_bonus_percent: 0,
                accrue_bonus: false,
                accrue_bonus_rate: 0,
                destination_wallet: "8Kv5Nc2x1zUYGSHrmnPbhBPvsQbVRcH1zdAB6qZrK1cV".into(),
                destination_mint: "SOL".into(),
                payment_ttl: Duration::from_secs(900),
                pay_base_url: "https://pay.example.com/checkout".into(),
            },
        )
        .unwrap();
        let emitter = Arc::new(Emitter::new());
        let service = Arc::new(ServiceEvents::new(Arc::new(core), emitter));
        let state = AppState {
            service,
            swap: Arc::new(MemorySwap::new()),
            app_name: "Checkout".into(),
            app_icon: "https://example.com/icon.png".into(),
        };
        let auth_state = AuthState::new(
            Arc::new(auth::testing::MemTokenStore::default()),
            "client-1",
            "secret-1",
            b"signing-key".to_vec(),
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        router(state, auth_state, Arc::new(Broadcaster::new()))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn bearer_token(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/oauth/token")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "grant_type=client_credentials&client_id=client-1&client_secret=secret-1",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        body["access_token"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn merchant_routes_require_a_bearer() {
        let app = test_router();
        let response = app
            .oneshot(
                HttpRequest::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"amount": 100}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], 401);
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn create_and_fetch_payment() {
        let app = test_router();
        let token = bearer_token(&app).await;

        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        json!({"amount": 2_500_000, "external_id": "order-9"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let id = body["payment"]["id"].as_str().unwrap().to_owned();
        assert_eq!(body["payment"]["status"], "new");

        let response = app
            .clone()
            .oneshot(
                HttpRequest::get(format!("/pid/{id}"))
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                HttpRequest::get("/ext/order-9")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["payment"]["id"].as_str().unwrap(), id);
    }

    #[tokio::test]
    async fn invalid_body_answers_field_level_412() {
        let app = test_router();
        let token = bearer_token(&app).await;
        let response = app
            .oneshot(
                HttpRequest::post("/")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        json!({"amount": 0, "message": "x"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body = body_json(response).await;
        assert_eq!(body["code"], 412);
        assert!(body["fields"]["amount"].is_string());
        assert!(body["fields"]["message"].is_string());
    }

    #[tokio::test]
    async fn checkout_info_is_open_and_labelled() {
        let app = test_router();
        let response = app
            .oneshot(
                HttpRequest::get(format!(
                    "/checkout/{}/SOL/false",
                    Uuid::new_v4()
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["label"], "Checkout");
        assert_eq!(body["icon"], "https://example.com/icon.png");
    }

    #[tokio::test]
    async fn checkout_post_builds_a_transaction() {
        let app = test_router();
        let token = bearer_token(&app).await;

        // create a payment first
        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(json!({"amount": 1_000}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["payment"]["id"].as_str().unwrap().to_owned();

        let response = app
            .oneshot(
                HttpRequest::post(format!("/checkout/{id}/SOL/false"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"account": "7fUAJdStEuGbc3sM84cKRL6yYaaSstyLSU4ve5oovLS7"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["transaction"].as_str().is_some_and(|tx| !tx.is_empty()));
    }

    #[tokio::test]
    async fn cancel_answers_204_then_conflict_on_link() {
        let app = test_router();
        let token = bearer_token(&app).await;
        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(json!({"amount": 10}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let id = body["payment"]["id"].as_str().unwrap().to_owned();

        let response = app
            .clone()
            .oneshot(
                HttpRequest::post(format!("/pid/{id}/cancel"))
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                HttpRequest::post(format!("/pid/{id}/link"))
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(json!({"apply_bonus": false}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn health_answers_204() {
        let app = test_router();
        let response = app
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

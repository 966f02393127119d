//! Checkout service binary: wires the payment core, the Solana ledger
//! client, the job queue and the HTTP surface together.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/checkout \
//! OAUTH_SIGNING_KEY=... CLIENT_ID=... CLIENT_SECRET=... \
//! WEBHOOK_SIGNATURE_SECRET=... WEBHOOK_URI=https://merchant.example/hooks \
//! MERCHANT_WALLET_ADDRESS=... cargo run -p checkout-api --release
//! ```
//!
//! `RUST_LOG` controls the log filter (default `info`).

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use checkout::jobs::{Enqueuer, JobServer, PgJobQueue, Scheduler};
use checkout::payments::listeners::{
    attempt_created_listener, attempt_status_listener, reference_notification_listener,
};
use checkout::payments::worker::{
    ReconcileHandler, SweepAttemptsHandler, SweepPaymentsHandler, SweepPendingHandler,
};
use checkout::repository::PgRepository;
use checkout::webhook::{webhook_listener, FireWebhookHandler, WebhookService};
use checkout::{
    Emitter, EventName, PaymentConfig, PaymentService, Service, ServiceEvents, ServiceTrace,
};
use checkout_http::{AppState, AuthState, Broadcaster, PgTokenStore};
use checkout_svm::{JupiterClient, LedgerClient, SolanaRpcClient};
use solana_keypair::Keypair;

mod config;

use config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!("checkout api failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    tracing::info!(
        port = config.http_port,
        queue = %config.queue_name,
        rpc = %config.solana_rpc_endpoint,
        "loaded configuration"
    );

    // Storage
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_conns)
        .connect(&config.database_url)
        .await?;
    let repo = Arc::new(PgRepository::new(pool.clone()));
    repo.migrate().await?;

    // Ledger and swap capabilities
    let ledger: Arc<dyn LedgerClient> =
        Arc::new(SolanaRpcClient::new(&config.solana_rpc_endpoint));
    let swap = Arc::new(JupiterClient::new()?);
    tracing::debug!(
        wss = %config.solana_wss_endpoint,
        "account-change push channel configured but not consumed"
    );

    // Queue
    let queue = Arc::new(PgJobQueue::new(pool.clone()));
    let enqueuer = Arc::new(Enqueuer::new(queue).with_queue_name(&config.queue_name));

    // Payment service with its decorator pipeline
    let bonus_authority = if config.bonus_mint_authority.is_empty() {
        None
    } else {
        let bytes = bs58::decode(&config.bonus_mint_authority)
            .into_vec()
            .map_err(|e| format!("BONUS_MINT_AUTHORITY is not base58: {e}"))?;
        Some(Arc::new(
            Keypair::try_from(bytes.as_slice())
                .map_err(|e| format!("BONUS_MINT_AUTHORITY is not a keypair: {e}"))?,
        ))
    };
    let payment_config = PaymentConfig {
        apply_bonus: config.merchant_apply_bonus,
        bonus_mint: config.bonus_mint_address.clone(),
        bonus_authority,
        max_apply_bonus_amount: config.max_apply_bonus_amount,
        max_apply_bonus_percent: config.merchant_max_bonus_percentage,
        accrue_bonus: config.bonus_rate > 0 && !config.bonus_mint_address.is_empty(),
        accrue_bonus_rate: config.bonus_rate,
        destination_wallet: config.merchant_wallet_address.clone(),
        destination_mint: config.merchant_default_mint.clone(),
        payment_ttl: config.payment_ttl,
        pay_base_url: config.solana_pay_base_uri.clone(),
    };
    let emitter = Arc::new(Emitter::new());
    let core = Service::new(
        repo,
        Arc::clone(&ledger),
        Arc::clone(&swap) as _,
        payment_config,
    )?;
    let service: Arc<dyn PaymentService> = Arc::new(ServiceTrace::new(Arc::new(
        ServiceEvents::new(Arc::new(core), Arc::clone(&emitter)),
    )));

    // Event wiring: lifecycle listeners, webhooks, websocket fan-out
    emitter.on(
        EventName::AttemptUpdated,
        attempt_status_listener(Arc::clone(&service)),
    );
    emitter.on(
        EventName::AttemptCreated,
        attempt_created_listener(Arc::clone(&enqueuer)),
    );
    emitter.on(
        EventName::AttemptReferenceNotification,
        reference_notification_listener(Arc::clone(&enqueuer)),
    );
    emitter.listen_events(&webhook_listener(Arc::clone(&enqueuer)), EventName::ALL);
    let hub = Arc::new(Broadcaster::new());
    emitter.listen_events(&hub.listener(), EventName::ALL);

    // Background workers
    let webhook_service = WebhookService::new(
        config.webhook_uri.clone(),
        config.webhook_signature_secret.clone(),
    );
    let job_server = JobServer::new(pool.clone(), &config.queue_name)
        .with_concurrency(config.worker_concurrency)
        .register(Arc::new(ReconcileHandler::new(
            Arc::clone(&service),
            Arc::clone(&ledger),
        )))
        .register(Arc::new(SweepPaymentsHandler::new(Arc::clone(&service))))
        .register(Arc::new(SweepAttemptsHandler::new(Arc::clone(&service))))
        .register(Arc::new(SweepPendingHandler::new(
            Arc::clone(&service),
            Arc::clone(&enqueuer),
        )))
        .register(Arc::new(FireWebhookHandler::new(webhook_service)));

    let cancel = CancellationToken::new();
    let mut background = tokio::task::JoinSet::new();
    {
        let cancel = cancel.clone();
        background.spawn(async move { job_server.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        let scheduler = Scheduler::new(Arc::clone(&enqueuer));
        background.spawn(async move { scheduler.run(cancel).await });
    }

    // HTTP surface
    let auth_state = AuthState::new(
        Arc::new(PgTokenStore::new(pool)),
        config.client_id.clone(),
        config.client_secret.clone(),
        config.oauth_signing_key.clone().into_bytes(),
        config.access_token_ttl,
        config.refresh_token_ttl,
    );
    let state = AppState {
        service,
        swap,
        app_name: config.product_name.clone(),
        app_icon: config.product_icon.clone(),
    };
    let app = checkout_http::router_with_timeout(
        state,
        auth_state,
        hub,
        config.http_request_timeout,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Give in-flight background work a grace window, then cancel.
    cancel.cancel();
    let drain = async { while background.join_next().await.is_some() {} };
    if tokio::time::timeout(config.http_shutdown_timeout, drain)
        .await
        .is_err()
    {
        tracing::warn!("shutdown grace window exceeded, aborting background tasks");
        background.abort_all();
    }
    tracing::info!("checkout api shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("received Ctrl-C, shutting down...");
    }
}

use std::sync::{Arc, Mutex};

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fixify::config::AppConfig;
use fixify::db;
use fixify::handlers;
use fixify::services::gateway::PaystackGateway;
use fixify::services::notifications::BroadcastNotifier;
use fixify::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.paystack_secret_key.is_empty() {
        tracing::warn!("PAYSTACK_SECRET_KEY is not set; gateway calls and webhooks will fail");
    }
    let gateway = PaystackGateway::new(
        config.paystack_secret_key.clone(),
        config.paystack_base_url.clone(),
    );

    let events = Arc::new(BroadcastNotifier::new(config.notification_buffer));

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        gateway: Box::new(gateway),
        notifier: events.clone(),
        events,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/bookings",
            get(handlers::bookings::list_bookings).post(handlers::bookings::create_booking),
        )
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/status",
            put(handlers::bookings::update_status),
        )
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/:id/reschedule",
            post(handlers::bookings::reschedule_booking),
        )
        .route("/api/reviews", post(handlers::reviews::submit_review))
        .route("/api/wallet/fund", post(handlers::wallet::fund_wallet))
        .route(
            "/api/wallet/transactions",
            get(handlers::wallet::get_transactions),
        )
        .route("/api/wallet/audit", get(handlers::wallet::get_audit))
        .route(
            "/api/payments/initialize/:booking_id",
            post(handlers::payments::initialize_payment),
        )
        .route(
            "/api/payments/verify/:reference",
            post(handlers::payments::verify_payment),
        )
        .route(
            "/api/payments/webhook",
            post(handlers::payments::payment_webhook),
        )
        .route(
            "/api/notifications/events",
            get(handlers::notifications::events_stream),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use rust_decimal::Decimal;
use tower::ServiceExt;

use fixify::config::AppConfig;
use fixify::db::{self, queries};
use fixify::handlers;
use fixify::models::Role;
use fixify::services::gateway::{
    sign_webhook_body, ChargeInit, ChargeRequest, ChargeVerification, PaymentGateway,
};
use fixify::services::notifications::{BroadcastNotifier, Notification, NotificationSink};
use fixify::state::AppState;

const WEBHOOK_SECRET: &str = "sk_test_integration";

// ── Mock Collaborators ──

struct MockGateway {
    charges: Arc<Mutex<Vec<ChargeRequest>>>,
    succeed: bool,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeInit> {
        self.charges.lock().unwrap().push(request.clone());
        Ok(ChargeInit {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: "AC_test".to_string(),
        })
    }

    async fn verify_charge(&self, reference: &str) -> anyhow::Result<ChargeVerification> {
        Ok(ChargeVerification {
            success: self.succeed,
            gateway_reference: reference.to_string(),
            raw_payload: serde_json::json!({
                "reference": reference,
                "status": if self.succeed { "success" } else { "failed" },
            }),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, user_id: &str, notification: Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), notification));
        Ok(())
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        paystack_secret_key: WEBHOOK_SECRET.to_string(),
        paystack_base_url: "http://localhost:0".to_string(),
        payment_callback_url: "http://localhost:3000/payment/callback".to_string(),
        notification_buffer: 16,
    }
}

fn seed(conn: &rusqlite::Connection) {
    queries::create_user(conn, "customer-1", "Ada Obi", "ada@example.com", Role::Customer).unwrap();
    queries::create_user(conn, "customer-2", "Tunde Bello", "tunde@example.com", Role::Customer)
        .unwrap();
    queries::create_user(conn, "provider-user-1", "Chidi Okafor", "chidi@example.com", Role::Provider)
        .unwrap();
    queries::create_provider(conn, "provider-1", "provider-user-1", "Chidi Plumbing").unwrap();
    queries::set_provider_flags(conn, "provider-1", true, true).unwrap();
    queries::create_service(
        conn,
        "service-1",
        "provider-1",
        "plumbing",
        "Leak repair",
        Decimal::new(12500, 0),
    )
    .unwrap();
}

struct Harness {
    state: Arc<AppState>,
    notifier: Arc<RecordingNotifier>,
    charges: Arc<Mutex<Vec<ChargeRequest>>>,
}

fn test_state_with(succeed: bool) -> Harness {
    let conn = db::init_db(":memory:").unwrap();
    seed(&conn);

    let notifier = Arc::new(RecordingNotifier::default());
    let charges = Arc::new(Mutex::new(vec![]));
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: test_config(),
        gateway: Box::new(MockGateway {
            charges: Arc::clone(&charges),
            succeed,
        }),
        notifier: notifier.clone(),
        events: Arc::new(BroadcastNotifier::new(16)),
    });
    Harness {
        state,
        notifier,
        charges,
    }
}

fn test_state() -> Harness {
    test_state_with(true)
}

fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
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
        .with_state(state)
}

fn json_request(method: &str, uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let res = test_app(Arc::clone(state)).oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn booking_body(method: &str, time: &str) -> serde_json::Value {
    serde_json::json!({
        "service_id": "service-1",
        "scheduled_date": "2024-08-15",
        "scheduled_time": time,
        "address": {
            "street": "3 Awolowo Road",
            "city": "Ikoyi",
            "state": "Lagos",
            "landmark": null
        },
        "special_instructions": "Gate code 1234",
        "payment_method": method
    })
}

async fn fund(state: &Arc<AppState>, user: &str, amount: &str) {
    let (status, _) = send(
        state,
        json_request(
            "POST",
            "/api/wallet/fund",
            user,
            serde_json::json!({ "amount": amount, "reference": format!("topup-{user}") }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ── Health & Identity ──

#[tokio::test]
async fn test_health() {
    let h = test_state();
    let res = test_app(h.state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_user_header_is_forbidden() {
    let h = test_state();
    let res = test_app(h.state)
        .oneshot(
            Request::builder()
                .uri("/api/bookings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

// ── Wallet Bookings ──

#[tokio::test]
async fn test_wallet_booking_and_cancellation_refund() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;

    let (status, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "confirmed");
    assert_eq!(booking["payment_status"], "paid");
    assert_eq!(booking["scheduled_time"], "10:00");
    assert_eq!(booking["payment"]["status"], "successful");
    let id = booking["id"].as_str().unwrap().to_string();

    let (_, rows) = send(&h.state, get_request("/api/wallet/transactions", "customer-1")).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["kind"], "debit");
    assert_eq!(rows[1]["balance_after"], "37500");

    let (status, cancelled) = send(
        &h.state,
        json_request(
            "POST",
            &format!("/api/bookings/{id}/cancel"),
            "customer-1",
            serde_json::json!({ "reason": "Travelling" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["payment_status"], "refunded");
    assert_eq!(cancelled["cancellation_reason"], "Travelling");

    let (_, audit) = send(&h.state, get_request("/api/wallet/audit", "customer-1")).await;
    assert_eq!(audit["stored_balance"], "50000");
    assert_eq!(audit["replayed_balance"], "50000");
    assert_eq!(audit["transactions"], 3);

    let sent = h.notifier.sent.lock().unwrap();
    assert!(sent.iter().any(|(user, n)| user == "provider-user-1" && n.title == "Booking cancelled"));
}

#[tokio::test]
async fn test_insufficient_funds() {
    let h = test_state();
    fund(&h.state, "customer-1", "5000").await;

    let (status, body) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["error"].as_str().unwrap().contains("insufficient funds"));

    let (_, bookings) = send(&h.state, get_request("/api/bookings", "customer-1")).await;
    assert!(bookings.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_conflicting_slot() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;

    let (status, _) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-2", booking_body("card", "10:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_booking_visible_only_to_parties() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;
    let (_, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    let uri = format!("/api/bookings/{}", booking["id"].as_str().unwrap());

    let (status, details) = send(&h.state, get_request(&uri, "provider-user-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["service"]["name"], "Leak repair");
    assert_eq!(details["provider"]["id"], "provider-1");

    let (status, _) = send(&h.state, get_request(&uri, "customer-2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Provider Lifecycle & Reviews ──

#[tokio::test]
async fn test_provider_completes_and_customer_reviews() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;
    let (_, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    let id = booking["id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/bookings/{id}/status");

    let (status, _) = send(
        &h.state,
        json_request("PUT", &status_uri, "customer-1", serde_json::json!({ "status": "in_progress" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.state,
        json_request("PUT", &status_uri, "provider-user-1", serde_json::json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    for next in ["in_progress", "completed"] {
        let (status, _) = send(
            &h.state,
            json_request("PUT", &status_uri, "provider-user-1", serde_json::json!({ "status": next })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let review = serde_json::json!({ "booking_id": id, "rating": 4, "comment": "Tidy work" });
    let (status, body) = send(
        &h.state,
        json_request("POST", "/api/reviews", "customer-1", review.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["rating"], 4);

    let (status, _) = send(&h.state, json_request("POST", "/api/reviews", "customer-1", review)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let provider = {
        let db = h.state.db.lock().unwrap();
        queries::get_provider(&db, "provider-1").unwrap().unwrap()
    };
    assert_eq!(provider.total_reviews, 1);
    assert_eq!(provider.average_rating, Decimal::new(400, 2));
    assert_eq!(provider.completed_jobs, 1);
}

#[tokio::test]
async fn test_unknown_status_is_bad_request() {
    let h = test_state();
    let (status, _) = send(
        &h.state,
        json_request(
            "PUT",
            "/api/bookings/whatever/status",
            "provider-user-1",
            serde_json::json!({ "status": "done" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Gateway Payments ──

#[tokio::test]
async fn test_gateway_initialize_then_verify() {
    let h = test_state();
    let (status, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("paystack", "10:00")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["payment"]["status"], "pending");
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, checkout) = send(
        &h.state,
        json_request("POST", &format!("/api/payments/initialize/{id}"), "customer-1", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reference = checkout["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("FXF_"));
    assert!(checkout["authorization_url"].as_str().unwrap().ends_with(&reference));

    {
        let charges = h.charges.lock().unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_minor, 1_250_000);
        assert_eq!(charges[0].email, "ada@example.com");
    }

    let (status, confirmation) = send(
        &h.state,
        json_request("POST", &format!("/api/payments/verify/{reference}"), "customer-1", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmation["payment"]["status"], "successful");
    assert_eq!(confirmation["booking"]["status"], "confirmed");
    assert_eq!(confirmation["booking"]["payment_status"], "paid");
    assert_eq!(confirmation["already_confirmed"], false);
}

#[tokio::test]
async fn test_gateway_failed_verification() {
    let h = test_state_with(false);
    let (_, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("card", "10:00")),
    )
    .await;
    let reference = booking["payment"]["transaction_reference"].as_str().unwrap().to_string();

    let (status, confirmation) = send(
        &h.state,
        json_request("POST", &format!("/api/payments/verify/{reference}"), "customer-1", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmation["payment"]["status"], "failed");
    assert_eq!(confirmation["booking"]["status"], "pending");
}

#[tokio::test]
async fn test_wallet_payment_cannot_use_gateway() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;
    let (_, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = send(
        &h.state,
        json_request("POST", &format!("/api/payments/initialize/{id}"), "customer-1", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.charges.lock().unwrap().is_empty());
}

// ── Webhook ──

fn webhook_request(body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header("Content-Type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-paystack-signature", sig);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

#[tokio::test]
async fn test_webhook_signature_required() {
    let h = test_state();
    let body = br#"{"event":"charge.success","data":{"reference":"FXF_1_0001"}}"#;

    let (status, _) = send(&h.state, webhook_request(body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign_webhook_body("some-other-secret", body).unwrap();
    let (status, _) = send(&h.state, webhook_request(body, Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_confirms_payment_once() {
    let h = test_state();
    let (_, booking) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("paystack", "10:00")),
    )
    .await;
    let reference = booking["payment"]["transaction_reference"].as_str().unwrap().to_string();

    let body = serde_json::to_vec(&serde_json::json!({
        "event": "charge.success",
        "data": { "reference": reference, "status": "success", "amount": 1_250_000 }
    }))
    .unwrap();
    let sig = sign_webhook_body(WEBHOOK_SECRET, &body).unwrap();

    let (status, first) = send(&h.state, webhook_request(&body, Some(&sig))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "processed");
    assert_eq!(first["already_confirmed"], false);

    let notified = h.notifier.sent.lock().unwrap().len();
    let (status, second) = send(&h.state, webhook_request(&body, Some(&sig))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["already_confirmed"], true);
    assert_eq!(h.notifier.sent.lock().unwrap().len(), notified);
}

#[tokio::test]
async fn test_webhook_ignores_other_events() {
    let h = test_state();
    let body = br#"{"event":"transfer.success","data":{"reference":"TRF_1"}}"#;
    let sig = sign_webhook_body(WEBHOOK_SECRET, body).unwrap();

    let (status, outcome) = send(&h.state, webhook_request(body, Some(&sig))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "ignored");
    assert_eq!(outcome["event"], "transfer.success");
}

// ── Reschedule ──

#[tokio::test]
async fn test_reschedule_into_taken_slot() {
    let h = test_state();
    fund(&h.state, "customer-1", "50000").await;
    send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-1", booking_body("wallet", "10:00")),
    )
    .await;
    let (_, mine) = send(
        &h.state,
        json_request("POST", "/api/bookings", "customer-2", booking_body("card", "13:00")),
    )
    .await;
    let uri = format!("/api/bookings/{}/reschedule", mine["id"].as_str().unwrap());

    let (status, _) = send(
        &h.state,
        json_request(
            "POST",
            &uri,
            "customer-2",
            serde_json::json!({ "scheduled_date": "2024-08-15", "scheduled_time": "10:00" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, moved) = send(
        &h.state,
        json_request(
            "POST",
            &uri,
            "customer-2",
            serde_json::json!({ "scheduled_date": "2024-08-16", "scheduled_time": "10:00", "reason": "Clash" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["scheduled_date"], "2024-08-16");
    assert_eq!(moved["total_amount"], "12500");
}

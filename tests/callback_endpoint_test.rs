//! HTTP-level tests for the callback and payment endpoints, driven through
//! the router with the dummy backend and the in-memory store.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use payflow_backend::api::{self, AppState, ErrorEnvelope};
use payflow_backend::payments::providers::dummy::SIGNATURE_HEADER;
use payflow_backend::payments::providers::{DummyBackend, DummyConfig};
use payflow_backend::payments::types::{NewPayment, PaymentStatus};
use payflow_backend::payments::{
    BackendRegistry, InMemoryStore, LifecyclePolicy, PaymentProcessor,
};

struct Harness {
    app: Router,
    processor: Arc<PaymentProcessor>,
    backend: Arc<DummyBackend>,
}

fn harness(secret: Option<&str>) -> Harness {
    let backend = Arc::new(DummyBackend::new(DummyConfig {
        secret: secret.map(str::to_string),
        ..DummyConfig::default()
    }));
    let registry = BackendRegistry::new().with(backend.clone(), LifecyclePolicy::default());
    let processor = Arc::new(PaymentProcessor::new(
        Arc::new(registry),
        Arc::new(InMemoryStore::new()),
        "https://shop.example.com",
    ));
    let app = api::router(AppState::new(processor.clone(), "development"));

    Harness {
        app,
        processor,
        backend,
    }
}

async fn new_payment(processor: &PaymentProcessor) -> Uuid {
    processor
        .create_payment(NewPayment {
            order_id: "order-1".to_string(),
            backend: "dummy".to_string(),
            description: "Order #1".to_string(),
            currency: "PLN".to_string(),
            amount: dec!(100.00),
        })
        .await
        .unwrap()
        .id
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness(None);
    let response = h
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["backends"][0], "dummy");
}

#[tokio::test]
async fn test_unknown_payment_is_not_found() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;

    let uri = format!("/payments/callback/{}/", Uuid::new_v4());
    let response = h
        .app
        .clone()
        .oneshot(post(&uri, r#"{"status":"paid"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .app
        .oneshot(post("/payments/callback/not-a-uuid/", r#"{"status":"paid"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The existing payment was not touched
    let payment = h.processor.get_payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::New);
    assert_eq!(payment.version, 0);
}

#[tokio::test]
async fn test_paid_callback_and_redelivery() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;
    let uri = format!("/payments/callback/{}/", id);

    for _ in 0..2 {
        let response = h
            .app
            .clone()
            .oneshot(post(&uri, r#"{"status":"paid","amount":"100.00"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    let payment = h.processor.get_payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.amount_paid, dec!(100.00));
    assert_eq!(payment.version, 1);
}

#[tokio::test]
async fn test_route_without_trailing_slash() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;

    let response = h
        .app
        .oneshot(post(
            &format!("/payments/callback/{}", id),
            r#"{"status":"locked"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payment = h.processor.get_payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Locked);
    assert_eq!(payment.amount_locked, dec!(100.00));
}

#[tokio::test]
async fn test_signed_callbacks() {
    let h = harness(Some("callback-secret"));
    let id = new_payment(&h.processor).await;
    let uri = format!("/payments/callback/{}/", id);
    let body = r#"{"status":"paid"}"#;

    let response = h.app.clone().oneshot(post(&uri, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope: ErrorEnvelope =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(envelope.error.code, "CREDENTIALS_ERROR");
    assert_eq!(
        h.processor.get_payment(id).await.unwrap().status,
        PaymentStatus::New
    );

    let signature = h.backend.sign(body.as_bytes()).unwrap();
    let mut request = post(&uri, body);
    request
        .headers_mut()
        .insert(SIGNATURE_HEADER, signature.parse().unwrap());
    let response = h.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        h.processor.get_payment(id).await.unwrap().status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
async fn test_malformed_callback_body() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;

    let response = h
        .app
        .oneshot(post(&format!("/payments/callback/{}/", id), "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stale_callback_is_acknowledged() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;
    let uri = format!("/payments/callback/{}/", id);

    h.app
        .clone()
        .oneshot(post(&uri, r#"{"status":"paid"}"#))
        .await
        .unwrap();

    // A late "failed" must not downgrade a paid payment, but the gateway
    // still gets its acknowledgement
    let response = h
        .app
        .oneshot(post(&uri, r#"{"status":"failed"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        h.processor.get_payment(id).await.unwrap().status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
async fn test_checkout_redirects_to_paywall() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;

    let response = h
        .app
        .oneshot(post(&format!("/payments/{}/checkout", id), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains(&format!("payment={}", id)));

    let payment = h.processor.get_payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Prepared);
    assert_eq!(payment.external_id, Some(format!("dummy-{}", id)));
}

#[tokio::test]
async fn test_checkout_failure_is_generic() {
    let h = harness(None);
    let id = new_payment(&h.processor).await;
    h.backend.set_fail_operations(true);

    let response = h
        .app
        .oneshot(post(&format!("/payments/{}/checkout", id), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let envelope: ErrorEnvelope =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(envelope.error.code, "PAYMENT_UNAVAILABLE");
    assert_eq!(
        h.processor.get_payment(id).await.unwrap().status,
        PaymentStatus::New
    );
}

#[tokio::test]
async fn test_create_and_refund_over_http() {
    let h = harness(None);

    let response = h
        .app
        .clone()
        .oneshot(post(
            "/payments",
            r#"{"order_id":"order-9","backend":"dummy","description":"Order #9","currency":"eur","amount":"40.00"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json: serde_json::Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(json["currency"], "EUR");
    let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    h.app
        .clone()
        .oneshot(post(&format!("/payments/callback/{}/", id), r#"{"status":"paid"}"#))
        .await
        .unwrap();

    let response = h
        .app
        .clone()
        .oneshot(post(&format!("/payments/{}/refund", id), r#"{"amount":"15.00"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payment = h.processor.get_payment(id).await.unwrap();
    assert_eq!(payment.amount_refunded, dec!(15.00));
    assert_eq!(payment.status, PaymentStatus::Paid);

    // More than what is left is refused without reaching the gateway
    let response = h
        .app
        .oneshot(post(&format!("/payments/{}/refund", id), r#"{"amount":"30.00"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.backend.refund_calls(), 1);
}

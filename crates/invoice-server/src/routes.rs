//! Router

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    create_invoice, get_invoice, health_check, issue_payment_link, list_invoices,
    payment_confirmed, pre_checkout, telegram_webhook,
};
use crate::state::AppState;

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let origin = match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid CORS_ALLOWED_ORIGIN, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the application router
pub fn router(state: AppState, allowed_origin: Option<&str>) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(health_check))
        // Invoices
        .route("/invoices", post(create_invoice).get(list_invoices))
        .route("/invoices/{id}", get(get_invoice))
        .route("/invoices/{id}/payment-link", post(issue_payment_link))
        // Payment webhooks
        .route("/payment-events/pre-checkout", post(pre_checkout))
        .route("/payment-events/confirmed", post(payment_confirmed))
        .route("/webhook/telegram", post(telegram_webhook))
        .layer(cors_layer(allowed_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use invoice_core::{
        DeliveryError, InvoiceLifecycle, LifecycleConfig, MemoryInvoiceStore, PdfRenderer,
        RetryPolicy, delivery::MockDeliveryChannel, gateway::MockPaymentGateway,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    struct Harness {
        app: Router,
        gateway: Arc<MockPaymentGateway>,
        channel: Arc<MockDeliveryChannel>,
    }

    fn harness(secret: Option<&str>) -> Harness {
        let gateway = Arc::new(MockPaymentGateway::new());
        let channel = Arc::new(MockDeliveryChannel::new());
        let lifecycle = InvoiceLifecycle::new(
            Arc::new(MemoryInvoiceStore::new()),
            gateway.clone(),
            Arc::new(PdfRenderer::new()),
            channel.clone(),
            LifecycleConfig {
                retry: RetryPolicy::immediate(2),
                ..Default::default()
            },
        );
        let state = AppState {
            lifecycle: Arc::new(lifecycle),
            webhook_secret: secret.map(Arc::from),
        };

        Harness {
            app: router(state, None),
            gateway,
            channel,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("x-telegram-bot-api-secret-token", SECRET)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn invoice_body() -> Value {
        json!({
            "chatId": 42,
            "yourInfo": { "name": "Studio", "email": "studio@example.com" },
            "clientInfo": { "name": "Client", "email": "client@example.com" },
            "items": [
                { "description": "Design", "amount": 2, "price": "50.00" },
            ],
        })
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(app, post_json("/invoices", &invoice_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        body["invoice_id"].as_str().unwrap().to_string()
    }

    fn confirmation(invoice_id: &str, reference: &str) -> Value {
        json!({
            "invoice_id": invoice_id,
            "payment_reference": reference,
            "amount": 100,
            "currency": "XTR",
        })
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(None);
        let (status, body) = send(&h.app, get("/healthz")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_invoice_issues_link() {
        let h = harness(None);
        let (status, body) = send(&h.app, post_json("/invoices", &invoice_body())).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["state"], "awaiting_payment");
        assert_eq!(body["total"], "100.00");
        assert_eq!(body["currency"], "XTR");
        assert_eq!(body["amount"], 100);

        let id = body["invoice_id"].as_str().unwrap();
        assert_eq!(body["payment_link"], format!("https://pay.example/{id}"));
        assert_eq!(h.gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_create_invoice_rejects_invalid_data() {
        let h = harness(None);

        let mut empty = invoice_body();
        empty["items"] = json!([]);
        let (status, body) = send(&h.app, post_json("/invoices", &empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INVOICE_DATA");

        let (status, _) = send(&h.app, post_json("/invoices", &json!({ "items": "nope" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_outage_then_retry() {
        let h = harness(None);
        h.gateway.set_available(false);

        let (status, body) = send(&h.app, post_json("/invoices", &invoice_body())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "GATEWAY_UNAVAILABLE");
        let id = body["invoice_id"].as_str().unwrap().to_string();

        let (_, view) = send(&h.app, get(&format!("/invoices/{id}"))).await;
        assert_eq!(view["state"], "created");

        h.gateway.set_available(true);
        let uri = format!("/invoices/{id}/payment-link");
        let (status, link) = send(&h.app, post_json(&uri, &json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(link["amount"], 100);

        let (_, again) = send(&h.app, post_json(&uri, &json!({}))).await;
        assert_eq!(again["payment_link"], link["payment_link"]);
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_found() {
        let h = harness(None);
        let (status, body) = send(&h.app, get("/invoices/inv_0_00000000")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "UNKNOWN_INVOICE");
    }

    #[tokio::test]
    async fn test_pre_checkout_decisions() {
        let h = harness(None);
        let id = create(&h.app).await;

        let query = json!({ "invoice_id": id, "amount": 100, "currency": "XTR" });
        let (status, body) = send(&h.app, post_json("/payment-events/pre-checkout", &query)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"], "accept");

        let wrong = json!({ "invoice_id": id, "amount": 1, "currency": "XTR" });
        let (_, body) = send(&h.app, post_json("/payment-events/pre-checkout", &wrong)).await;
        assert_eq!(body["decision"], "reject");
    }

    #[tokio::test]
    async fn test_confirmation_delivers_once() {
        let h = harness(None);
        let id = create(&h.app).await;
        let event = confirmation(&id, "charge-1");

        let (status, first) = send(&h.app, post_json("/payment-events/confirmed", &event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["outcome"], "delivered");

        let (status, second) = send(&h.app, post_json("/payment-events/confirmed", &event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["outcome"], "already_handled");
        assert_eq!(h.channel.deliveries().len(), 1);

        let (_, view) = send(&h.app, get(&format!("/invoices/{id}"))).await;
        assert_eq!(view["state"], "delivered");
        assert_eq!(view["payment_reference"], "charge-1");
    }

    #[tokio::test]
    async fn test_confirmation_for_unknown_invoice_is_acknowledged() {
        let h = harness(None);
        let event = confirmation("inv_0_00000000", "charge-x");

        let (status, body) = send(&h.app, post_json("/payment-events/confirmed", &event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "ignored");
        assert!(h.channel.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_invoices_are_listed() {
        let h = harness(None);
        let id = create(&h.app).await;
        h.channel
            .fail_next(DeliveryError::InvalidAddress("chat not found".into()));

        let event = confirmation(&id, "charge-2");
        let (status, body) = send(&h.app, post_json("/payment-events/confirmed", &event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "failed");

        let (status, listed) = send(&h.app, get("/invoices?state=failed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["invoice_id"], id.as_str());

        let (status, _) = send(&h.app, get("/invoices?state=lost")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_secret_required() {
        let h = harness(Some(SECRET));
        let id = create(&h.app).await;

        let request = Request::post("/payment-events/confirmed")
            .header("content-type", "application/json")
            .header("x-telegram-bot-api-secret-token", "wrong")
            .body(Body::from(confirmation(&id, "charge-3").to_string()))
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "INVALID_SECRET");
        assert!(h.channel.deliveries().is_empty());

        let (status, _) = send(
            &h.app,
            post_json("/payment-events/confirmed", &confirmation(&id, "charge-3")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.channel.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_secret_checked_before_body_is_parsed() {
        let h = harness(Some(SECRET));

        for uri in ["/payment-events/pre-checkout", "/payment-events/confirmed"] {
            let request = Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from("{\"unexpected\": true}"))
                .unwrap();
            let (status, body) = send(&h.app, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["code"], "INVALID_SECRET");

            let (status, body) = send(&h.app, post_json(uri, &json!({ "unexpected": true }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "INVALID_PAYLOAD");
        }
        assert!(h.channel.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_telegram_pre_checkout_answered_inline() {
        let h = harness(Some(SECRET));
        let id = create(&h.app).await;

        let update = json!({
            "update_id": 1,
            "pre_checkout_query": {
                "id": "q-1",
                "from": { "id": 42, "is_bot": false, "first_name": "Ann" },
                "currency": "XTR",
                "total_amount": 100,
                "invoice_payload": id,
            },
        });
        let (status, body) = send(&h.app, post_json("/webhook/telegram", &update)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "answerPreCheckoutQuery");
        assert_eq!(body["pre_checkout_query_id"], "q-1");
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_telegram_successful_payment_delivers() {
        let h = harness(Some(SECRET));
        let id = create(&h.app).await;

        let update = json!({
            "update_id": 2,
            "message": {
                "message_id": 9,
                "date": 1700000000,
                "chat": { "id": 42, "type": "private" },
                "successful_payment": {
                    "currency": "XTR",
                    "total_amount": 100,
                    "invoice_payload": id,
                    "telegram_payment_charge_id": "tg-charge-9",
                    "provider_payment_charge_id": "",
                },
            },
        });

        for _ in 0..2 {
            let (status, _) = send(&h.app, post_json("/webhook/telegram", &update)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let deliveries = h.channel.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].address.as_str(), "42");
    }

    #[tokio::test]
    async fn test_telegram_other_updates_acknowledged() {
        let h = harness(None);

        let update = json!({
            "update_id": 3,
            "message": {
                "message_id": 10,
                "date": 1700000000,
                "chat": { "id": 42, "type": "private" },
                "text": "/start",
            },
        });
        let (status, body) = send(&h.app, post_json("/webhook/telegram", &update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        let garbage = Request::post("/webhook/telegram")
            .body(Body::from("not json"))
            .unwrap();
        let (status, _) = send(&h.app, garbage).await;
        assert_eq!(status, StatusCode::OK);
    }
}

//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;

use invoice_core::{
    ChannelAddress, Currency, Invoice, InvoiceError, InvoiceId, InvoiceRequest, InvoiceState,
    LineItem, Party, PaymentConfirmed, PaymentOutcome, PaymentReference, PreCheckout,
    PreCheckoutDecision, render::format_amount,
};
use invoice_telegram::{PreCheckoutAnswer, SECRET_TOKEN_HEADER, Update, WebhookEvent};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,

    /// Set when the invoice was stored but a later step failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Invoice creation payload; accepts the bot client's field names too
#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    #[serde(alias = "chatId", alias = "chat_id")]
    pub recipient: ChannelAddress,

    #[serde(alias = "items")]
    pub line_items: Vec<LineItem>,

    #[serde(default, alias = "yourInfo")]
    pub issuer: Party,

    #[serde(default, alias = "clientInfo")]
    pub bill_to: Party,
}

#[derive(Debug, Serialize)]
pub struct InvoiceView {
    pub invoice_id: InvoiceId,
    pub state: InvoiceState,
    pub total: String,
    pub currency: Currency,

    /// Amount in the smallest currency unit
    pub amount: Option<i64>,

    pub payment_link: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<PaymentReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl InvoiceView {
    fn new(invoice: &Invoice, currency: &Currency) -> Self {
        let (amount, currency) = match &invoice.payment_link {
            Some(link) => (Some(link.amount), link.currency.clone()),
            None => (invoice.amount_in(currency), currency.clone()),
        };

        Self {
            invoice_id: invoice.id.clone(),
            state: invoice.state,
            total: format_amount(invoice.total()),
            currency,
            amount,
            payment_link: invoice.payment_link.as_ref().map(|link| link.url.clone()),
            payment_reference: invoice.payment_reference.clone(),
            failure_reason: invoice.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentLinkResponse {
    pub invoice_id: InvoiceId,
    pub payment_link: String,
    pub amount: i64,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub state: String,
}

// ============================================================================
// Error Mapping
// ============================================================================

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
            invoice_id: None,
        }),
    )
}

fn invoice_error(err: &InvoiceError) -> ApiError {
    let (status, code) = match err {
        InvoiceError::InvalidInvoiceData(_) => (StatusCode::BAD_REQUEST, "INVALID_INVOICE_DATA"),
        InvoiceError::UnknownInvoice(_) => (StatusCode::NOT_FOUND, "UNKNOWN_INVOICE"),
        InvoiceError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
        InvoiceError::GatewayUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
        }
        InvoiceError::Render(_) | InvoiceError::Delivery(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "FULFILMENT_ERROR")
        }
        InvoiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }

    api_error(status, err.user_message(), code)
}

/// Reject webhook calls without the configured secret
fn verify_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(SECRET_TOKEN_HEADER)
        .map(HeaderValue::as_bytes)
        .unwrap_or_default();

    if bool::from(provided.ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Webhook call with missing or wrong secret");
        Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Invalid webhook secret",
            "INVALID_SECRET",
        ))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create an invoice and issue its payable link
pub async fn create_invoice(
    State(state): State<AppState>,
    payload: Result<Json<CreateInvoiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InvoiceView>), ApiError> {
    let Json(payload) = payload.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, e.body_text(), "INVALID_INVOICE_DATA")
    })?;

    let request = InvoiceRequest {
        recipient: payload.recipient,
        line_items: payload.line_items,
        issuer: payload.issuer,
        bill_to: payload.bill_to,
    };

    let lifecycle = &state.lifecycle;
    let invoice = lifecycle
        .request_invoice(request)
        .map_err(|e| invoice_error(&e))?;

    if let Err(e) = lifecycle.issue_payment_link(&invoice.id).await {
        let (status, Json(mut body)) = invoice_error(&e);
        body.invoice_id = Some(invoice.id.clone());
        return Err((status, Json(body)));
    }

    let invoice = lifecycle.invoice(&invoice.id).map_err(|e| invoice_error(&e))?;
    Ok((
        StatusCode::CREATED,
        Json(InvoiceView::new(&invoice, &lifecycle.config().currency)),
    ))
}

/// Issue (or re-read) the payable link of an existing invoice
pub async fn issue_payment_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentLinkResponse>, ApiError> {
    let invoice_id = InvoiceId::from_string(id);
    let link = state
        .lifecycle
        .issue_payment_link(&invoice_id)
        .await
        .map_err(|e| invoice_error(&e))?;

    Ok(Json(PaymentLinkResponse {
        invoice_id,
        payment_link: link.url,
        amount: link.amount,
        currency: link.currency,
    }))
}

/// Invoice status
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceView>, ApiError> {
    let lifecycle = &state.lifecycle;
    let invoice = lifecycle
        .invoice(&InvoiceId::from_string(id))
        .map_err(|e| invoice_error(&e))?;

    Ok(Json(InvoiceView::new(&invoice, &lifecycle.config().currency)))
}

/// Invoices in a given state, e.g. `?state=failed` for reconciliation
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceView>>, ApiError> {
    let wanted = InvoiceState::parse(&query.state).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Unknown state: {}", query.state),
            "INVALID_STATE_FILTER",
        )
    })?;

    let lifecycle = &state.lifecycle;
    let currency = &lifecycle.config().currency;
    let invoices = lifecycle
        .invoices_in(wanted)
        .map_err(|e| invoice_error(&e))?;

    Ok(Json(
        invoices
            .iter()
            .map(|invoice| InvoiceView::new(invoice, currency))
            .collect(),
    ))
}

/// Parse a webhook body; callers check the secret first
fn parse_event<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_PAYLOAD"))
}

/// Gateway-neutral pre-checkout webhook
pub async fn pre_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PreCheckoutDecision>, ApiError> {
    verify_secret(&state, &headers)?;
    let query: PreCheckout = parse_event(&body)?;
    Ok(Json(state.lifecycle.handle_pre_checkout(&query)))
}

/// Gateway-neutral payment confirmation webhook
pub async fn payment_confirmed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    verify_secret(&state, &headers)?;
    let event: PaymentConfirmed = parse_event(&body)?;
    confirm_payment(&state, &event)
        .await
        .map(|outcome| Json(outcome).into_response())
}

/// Record the payment and fulfil the invoice.
///
/// Events for unknown invoices are acknowledged so the gateway stops
/// redelivering them; storage failures before the payment is recorded are
/// returned as 5xx so it retries.
async fn confirm_payment(
    state: &AppState,
    event: &PaymentConfirmed,
) -> Result<serde_json::Value, ApiError> {
    match state.lifecycle.handle_payment_confirmed(event).await {
        Ok(outcome) => Ok(outcome_json(&outcome)),
        Err(InvoiceError::UnknownInvoice(invoice_id)) => {
            tracing::warn!(
                invoice_id = %invoice_id,
                payment_reference = %event.payment_reference.as_str(),
                reconciliation = true,
                "Payment for unknown invoice ignored"
            );
            Ok(json!({
                "outcome": "ignored",
                "invoice_id": invoice_id,
                "reason": "Invoice not found.",
            }))
        }
        Err(e) => Err(invoice_error(&e)),
    }
}

fn outcome_json(outcome: &PaymentOutcome) -> serde_json::Value {
    serde_json::to_value(outcome).unwrap_or_else(|_| json!({ "outcome": "unknown" }))
}

/// Telegram Bot API webhook
pub async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    verify_secret(&state, &headers)?;

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            // Acknowledge anyway; a 4xx makes the Bot API redeliver forever
            tracing::warn!(error = %e, "Unparseable update ignored");
            return Ok(StatusCode::OK.into_response());
        }
    };
    let update_id = update.update_id;

    match update.into_event() {
        WebhookEvent::PreCheckout(query) => {
            let decision = state.lifecycle.handle_pre_checkout(&query);
            tracing::info!(
                update_id,
                invoice_id = %query.invoice_id,
                accepted = decision.is_accept(),
                "Answering pre-checkout query"
            );
            Ok(Json(PreCheckoutAnswer::new(query.query_id, &decision)).into_response())
        }
        WebhookEvent::PaymentConfirmed { chat, event } => {
            tracing::info!(
                update_id,
                chat = %chat,
                invoice_id = %event.invoice_id,
                "Successful payment received"
            );
            confirm_payment(&state, &event).await?;
            Ok(StatusCode::OK.into_response())
        }
        WebhookEvent::Ignored => {
            tracing::debug!(update_id, "Update ignored");
            Ok(StatusCode::OK.into_response())
        }
    }
}

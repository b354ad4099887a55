//! Webhook Updates
//!
//! Bot API `Update` payloads and their translation into gateway-neutral
//! payment events.

use invoice_core::{
    ChannelAddress, Currency, InvoiceId, PaymentConfirmed, PaymentReference, PreCheckout,
    PreCheckoutDecision,
};
use serde::{Deserialize, Serialize};

/// Header carrying the secret given to `setWebhook`
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Incoming update (only the kinds we subscribe to)
#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,

    #[serde(default)]
    pub message: Option<Message>,

    #[serde(default)]
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,

    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SuccessfulPayment {
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
    pub telegram_payment_charge_id: String,

    #[serde(default)]
    pub provider_payment_charge_id: Option<String>,
}

/// What an update means for the invoice lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    PreCheckout(PreCheckout),
    PaymentConfirmed {
        chat: ChannelAddress,
        event: PaymentConfirmed,
    },
    Ignored,
}

impl Update {
    pub fn into_event(self) -> WebhookEvent {
        if let Some(query) = self.pre_checkout_query {
            return WebhookEvent::PreCheckout(PreCheckout {
                query_id: query.id,
                invoice_id: InvoiceId::from_string(query.invoice_payload),
                amount: query.total_amount,
                currency: Currency::new(query.currency),
            });
        }

        match self.message {
            Some(Message {
                chat,
                successful_payment: Some(payment),
                ..
            }) => WebhookEvent::PaymentConfirmed {
                chat: ChannelAddress::new(chat.id.to_string()),
                event: PaymentConfirmed {
                    invoice_id: InvoiceId::from_string(payment.invoice_payload),
                    payment_reference: PaymentReference::new(payment.telegram_payment_charge_id),
                    amount: Some(payment.total_amount),
                    currency: Some(Currency::new(payment.currency)),
                },
            },
            _ => WebhookEvent::Ignored,
        }
    }
}

/// `answerPreCheckoutQuery` returned as the webhook response body
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PreCheckoutAnswer {
    pub method: &'static str,
    pub pre_checkout_query_id: String,
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PreCheckoutAnswer {
    pub fn new(query_id: impl Into<String>, decision: &PreCheckoutDecision) -> Self {
        let (ok, error_message) = match decision {
            PreCheckoutDecision::Accept => (true, None),
            PreCheckoutDecision::Reject { reason } => (false, Some(reason.clone())),
        };

        Self {
            method: "answerPreCheckoutQuery",
            pre_checkout_query_id: query_id.into(),
            ok,
            error_message,
        }
    }
}

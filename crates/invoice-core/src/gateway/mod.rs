//! Payment Gateway Integration
//!
//! Abstraction over whatever mints payable links and reports payments back.

mod mock;

pub use mock::MockPaymentGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::{Currency, InvoiceId, PayableLink, PaymentReference};

/// Request to mint a payable link for one invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableLinkRequest {
    /// Carried through the gateway as the payment payload
    pub invoice_id: InvoiceId,

    /// Amount in the currency's smallest unit
    pub amount: i64,

    pub currency: Currency,

    pub title: String,

    pub description: String,
}

/// Payment gateway trait (Strategy pattern)
///
/// Implement this for each provider: Telegram payments, Stripe, etc.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Mint a link the payer can follow to settle the invoice
    async fn create_payable_link(
        &self,
        request: &PayableLinkRequest,
    ) -> Result<PayableLink, GatewayError>;

    /// Gateway name
    fn name(&self) -> &str;
}

/// Pre-checkout query sent by the gateway right before it charges the payer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCheckout {
    /// Gateway-side query id, needed to answer the query
    #[serde(default)]
    pub query_id: String,

    pub invoice_id: InvoiceId,

    /// Amount about to be charged, in the smallest currency unit
    pub amount: i64,

    pub currency: Currency,
}

/// Successful payment notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub invoice_id: InvoiceId,

    /// Unique charge id issued by the gateway
    pub payment_reference: PaymentReference,

    #[serde(default)]
    pub amount: Option<i64>,

    #[serde(default)]
    pub currency: Option<Currency>,
}

/// Answer to a pre-checkout query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PreCheckoutDecision {
    Accept,
    Reject { reason: String },
}

impl PreCheckoutDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        PreCheckoutDecision::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, PreCheckoutDecision::Accept)
    }
}

//! Invoice Lifecycle
//!
//! State machine driving an invoice from creation to delivery:
//!
//! ```text
//! Created ──issue link──▶ AwaitingPayment ──payment──▶ Paid ──deliver──▶ Delivered
//!    │                          │                        │
//!    └──────────────────────────┴────────────────────────┴──────▶ Failed
//! ```
//!
//! The `AwaitingPayment → Paid` compare-and-transition is the single-delivery
//! guarantee: whichever webhook delivery wins it renders and sends the document,
//! every other delivery of the same payment becomes a no-op.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryChannel, DeliveryMetadata, RetryPolicy, deliver_with_retry};
use crate::error::{InvoiceError, RenderError, Result, StoreError};
use crate::gateway::{PayableLinkRequest, PaymentConfirmed, PaymentGateway, PreCheckout, PreCheckoutDecision};
use crate::model::{
    ChannelAddress, Currency, DeliveryReceipt, Invoice, InvoiceId, InvoiceState, LineItem,
    PayableLink, Party, Transition, validate_line_items,
};
use crate::render::{DocumentRenderer, RenderedDocument};
use crate::store::InvoiceStore;

/// Lifecycle configuration
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Currency payable links are issued in
    pub currency: Currency,

    /// Title shown on the payable link
    pub product_title: String,

    /// Description shown on the payable link
    pub product_description: String,

    /// File name of the delivered document
    pub document_file_name: String,

    /// Message sent alongside the document
    pub document_caption: String,

    /// Retry policy for transient delivery failures
    pub retry: RetryPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            product_title: "Invoice PDF".into(),
            product_description: "A PDF invoice generated from your data".into(),
            document_file_name: "invoice.pdf".into(),
            document_caption: "Here is your generated invoice!".into(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Data needed to open an invoice
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub recipient: ChannelAddress,
    pub line_items: Vec<LineItem>,
    pub issuer: Party,
    pub bill_to: Party,
}

/// What happened to a confirmed payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// This call rendered and delivered the document
    Delivered {
        invoice_id: InvoiceId,
        receipt: DeliveryReceipt,
    },

    /// Another delivery of the event already handled it
    AlreadyHandled {
        invoice_id: InvoiceId,
        state: InvoiceState,
    },

    /// Payment recorded but the document could not be produced or sent;
    /// left in `Failed` for reconciliation
    Failed {
        invoice_id: InvoiceId,
        reason: String,
    },
}

/// The invoice state machine
pub struct InvoiceLifecycle {
    store: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    renderer: Arc<dyn DocumentRenderer>,
    channel: Arc<dyn DeliveryChannel>,
    config: LifecycleConfig,
}

impl InvoiceLifecycle {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        gateway: Arc<dyn PaymentGateway>,
        renderer: Arc<dyn DocumentRenderer>,
        channel: Arc<dyn DeliveryChannel>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            renderer,
            channel,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Look up an invoice
    pub fn invoice(&self, id: &InvoiceId) -> Result<Invoice> {
        self.store
            .get(id)?
            .ok_or_else(|| InvoiceError::UnknownInvoice(id.clone()))
    }

    /// Invoices in a given state (e.g. `Failed` ones awaiting reconciliation)
    pub fn invoices_in(&self, state: InvoiceState) -> Result<Vec<Invoice>> {
        Ok(self.store.list_by_state(state)?)
    }

    /// Validate and store a new invoice in `Created`
    pub fn request_invoice(&self, request: InvoiceRequest) -> Result<Invoice> {
        if request.recipient.is_blank() {
            return Err(InvoiceError::InvalidInvoiceData(
                "recipient address is required".into(),
            ));
        }
        validate_line_items(&request.line_items).map_err(InvoiceError::InvalidInvoiceData)?;

        let invoice = Invoice::new(
            request.recipient,
            request.line_items,
            request.issuer,
            request.bill_to,
        );

        match invoice.amount_in(&self.config.currency) {
            Some(amount) if amount > 0 => {}
            _ => {
                return Err(InvoiceError::InvalidInvoiceData(format!(
                    "total {} is not payable in {}",
                    invoice.total(),
                    self.config.currency
                )));
            }
        }

        self.store.create(invoice.clone())?;

        tracing::info!(
            invoice_id = %invoice.id,
            recipient = %invoice.recipient,
            total = %invoice.total(),
            items = invoice.line_items.len(),
            "Created invoice"
        );

        Ok(invoice)
    }

    /// Ask the gateway for a payable link and move `Created → AwaitingPayment`.
    ///
    /// Safe to retry: a gateway failure leaves the invoice in `Created`, and an
    /// invoice already awaiting payment returns its existing link.
    pub async fn issue_payment_link(&self, id: &InvoiceId) -> Result<PayableLink> {
        let invoice = self.invoice(id)?;

        match invoice.state {
            InvoiceState::Created => {}
            InvoiceState::AwaitingPayment => {
                if let Some(link) = &invoice.payment_link {
                    return Ok(link.clone());
                }
            }
            state => {
                return Err(InvoiceError::InvalidState {
                    id: id.clone(),
                    state,
                    operation: "issue a payment link",
                });
            }
        }

        let amount = invoice.amount_in(&self.config.currency).ok_or_else(|| {
            InvoiceError::InvalidInvoiceData(format!(
                "total {} is not representable in {}",
                invoice.total(),
                self.config.currency
            ))
        })?;

        let request = PayableLinkRequest {
            invoice_id: id.clone(),
            amount,
            currency: self.config.currency.clone(),
            title: self.config.product_title.clone(),
            description: self.config.product_description.clone(),
        };

        let link = self
            .gateway
            .create_payable_link(&request)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    invoice_id = %id,
                    gateway = self.gateway.name(),
                    error = %e,
                    "Payable link creation failed"
                );
            })?;

        match self.store.compare_and_transition(
            id,
            InvoiceState::Created,
            Transition::AwaitPayment { link: link.clone() },
        ) {
            Ok(_) => {
                tracing::info!(invoice_id = %id, url = %link.url, "Issued payment link");
                Ok(link)
            }
            // A concurrent request issued its link first; hand out the stored one.
            Err(StoreError::StaleState { .. }) => {
                let current = self.invoice(id)?;
                current.payment_link.ok_or(InvoiceError::InvalidState {
                    id: id.clone(),
                    state: current.state,
                    operation: "issue a payment link",
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Answer a pre-checkout query. Read-only: never mutates the invoice.
    pub fn handle_pre_checkout(&self, query: &PreCheckout) -> PreCheckoutDecision {
        let invoice = match self.store.get(&query.invoice_id) {
            Ok(Some(invoice)) => invoice,
            Ok(None) => {
                tracing::warn!(invoice_id = %query.invoice_id, "Pre-checkout for unknown invoice");
                return PreCheckoutDecision::reject("Invoice not found.");
            }
            Err(e) => {
                tracing::error!(invoice_id = %query.invoice_id, error = %e, "Pre-checkout lookup failed");
                return PreCheckoutDecision::reject("Invoice is temporarily unavailable.");
            }
        };

        if invoice.state != InvoiceState::AwaitingPayment {
            tracing::info!(
                invoice_id = %invoice.id,
                state = %invoice.state,
                "Rejected pre-checkout: invoice not awaiting payment"
            );
            return PreCheckoutDecision::reject(format!(
                "Invoice is {} and cannot be paid.",
                invoice.state
            ));
        }

        let expected = invoice.amount_in(&query.currency);
        if query.currency != self.config.currency || expected != Some(query.amount) {
            tracing::warn!(
                invoice_id = %invoice.id,
                amount = query.amount,
                currency = %query.currency,
                expected = ?expected,
                "Rejected pre-checkout: amount mismatch"
            );
            return PreCheckoutDecision::reject("Payment amount does not match the invoice.");
        }

        tracing::debug!(invoice_id = %invoice.id, "Accepted pre-checkout");
        PreCheckoutDecision::Accept
    }

    /// Record a confirmed payment, then render and deliver the document exactly once.
    ///
    /// Duplicate or concurrent deliveries of the same webhook return
    /// `AlreadyHandled`. Render/delivery failures after the payment is recorded
    /// are not errors to the gateway: the invoice moves to `Failed` and the
    /// outcome says so.
    pub async fn handle_payment_confirmed(&self, event: &PaymentConfirmed) -> Result<PaymentOutcome> {
        if let Some(existing) = self.store.find_by_payment_reference(&event.payment_reference)? {
            tracing::info!(
                invoice_id = %existing.id,
                payment_reference = %event.payment_reference,
                state = %existing.state,
                "Duplicate payment event ignored"
            );
            return Ok(PaymentOutcome::AlreadyHandled {
                invoice_id: existing.id,
                state: existing.state,
            });
        }

        let invoice = self.invoice(&event.invoice_id)?;
        self.check_paid_amount(&invoice, event);

        let transition = Transition::RecordPayment {
            reference: event.payment_reference.clone(),
            paid_at: Utc::now(),
        };
        let paid = match self.store.compare_and_transition(
            &invoice.id,
            InvoiceState::AwaitingPayment,
            transition,
        ) {
            Ok(paid) => paid,
            Err(StoreError::StaleState { actual, .. }) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    payment_reference = %event.payment_reference,
                    state = %actual,
                    "Payment event lost the race, already handled"
                );
                return Ok(PaymentOutcome::AlreadyHandled {
                    invoice_id: invoice.id,
                    state: actual,
                });
            }
            Err(StoreError::DuplicatePaymentReference { invoice_id, .. }) => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    owner = %invoice_id,
                    payment_reference = %event.payment_reference,
                    "Payment reference already recorded against another invoice"
                );
                let state = self.invoice(&invoice_id)?.state;
                return Ok(PaymentOutcome::AlreadyHandled { invoice_id, state });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            invoice_id = %paid.id,
            payment_reference = %event.payment_reference,
            "Payment recorded"
        );

        Ok(self.fulfil(paid).await)
    }

    /// Warn when the gateway reports a different amount than the invoice total
    fn check_paid_amount(&self, invoice: &Invoice, event: &PaymentConfirmed) {
        let (Some(amount), Some(currency)) = (event.amount, event.currency.as_ref()) else {
            return;
        };

        let expected = invoice.amount_in(currency);
        if expected != Some(amount) || *currency != self.config.currency {
            tracing::warn!(
                invoice_id = %invoice.id,
                amount,
                currency = %currency,
                expected = ?expected,
                reconciliation = true,
                "Paid amount differs from invoice total"
            );
        }
    }

    /// Render and deliver a `Paid` invoice, recording the result
    async fn fulfil(&self, invoice: Invoice) -> PaymentOutcome {
        let document = match self.render(&invoice).await {
            Ok(document) => document,
            Err(e) => {
                return self.mark_failed(&invoice.id, format!("render failed: {e}"));
            }
        };

        let metadata = DeliveryMetadata {
            invoice_id: invoice.id.clone(),
            file_name: self.config.document_file_name.clone(),
            caption: self.config.document_caption.clone(),
        };

        let receipt = match deliver_with_retry(
            self.channel.as_ref(),
            &self.config.retry,
            &invoice.recipient,
            &document,
            &metadata,
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                return self.mark_failed(&invoice.id, format!("delivery failed: {e}"));
            }
        };

        let transition = Transition::MarkDelivered {
            receipt: receipt.clone(),
            delivered_at: Utc::now(),
        };
        match self
            .store
            .compare_and_transition(&invoice.id, InvoiceState::Paid, transition)
        {
            Ok(_) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    channel = self.channel.name(),
                    receipt = %receipt.reference,
                    size = document.len(),
                    "Invoice delivered"
                );
            }
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.id,
                    receipt = %receipt.reference,
                    error = %e,
                    reconciliation = true,
                    "Document delivered but state not recorded"
                );
            }
        }

        PaymentOutcome::Delivered {
            invoice_id: invoice.id,
            receipt,
        }
    }

    /// Render on the blocking pool; the document timestamp is the payment time
    async fn render(&self, invoice: &Invoice) -> std::result::Result<RenderedDocument, RenderError> {
        let renderer = self.renderer.clone();
        let rendered_at = invoice.paid_at.unwrap_or_else(Utc::now);
        let invoice = invoice.clone();

        tokio::task::spawn_blocking(move || renderer.render(&invoice, rendered_at))
            .await
            .map_err(|e| RenderError::Internal(e.to_string()))?
    }

    fn mark_failed(&self, id: &InvoiceId, reason: String) -> PaymentOutcome {
        tracing::error!(
            invoice_id = %id,
            reason = %reason,
            reconciliation = true,
            "Paid invoice could not be delivered"
        );

        let transition = Transition::MarkFailed {
            reason: reason.clone(),
            failed_at: Utc::now(),
        };
        if let Err(e) = self
            .store
            .compare_and_transition(id, InvoiceState::Paid, transition)
        {
            tracing::error!(
                invoice_id = %id,
                error = %e,
                reconciliation = true,
                "Failed to record invoice failure"
            );
        }

        PaymentOutcome::Failed {
            invoice_id: id.clone(),
            reason,
        }
    }
}

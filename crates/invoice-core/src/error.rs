//! Error Types

use thiserror::Error;

use crate::model::{InvoiceId, InvoiceState};

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, InvoiceError>;

/// Errors surfaced by the invoice lifecycle
#[derive(Error, Debug)]
pub enum InvoiceError {
    /// Client sent line items or parties that cannot be invoiced
    #[error("Invalid invoice data: {0}")]
    InvalidInvoiceData(String),

    /// A payment event or request referenced an invoice we never issued
    #[error("Unknown invoice: {0}")]
    UnknownInvoice(InvoiceId),

    /// Operation is not allowed in the invoice's current state
    #[error("Invoice {id} is {state}, cannot {operation}")]
    InvalidState {
        id: InvoiceId,
        state: InvoiceState,
        operation: &'static str,
    },

    /// Payment gateway could not mint a payable link
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(#[from] GatewayError),

    /// Document rendering failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Document delivery failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Invoice store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl InvoiceError {
    /// Check if the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            InvoiceError::GatewayUnavailable(_) => true,
            InvoiceError::Store(e) => e.is_retryable(),
            InvoiceError::Delivery(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            InvoiceError::InvalidInvoiceData(msg) => format!("Invalid invoice: {msg}"),
            InvoiceError::UnknownInvoice(_) => "Invoice not found.".into(),
            InvoiceError::InvalidState { state, .. } => {
                format!("Invoice is already {state}.")
            }
            InvoiceError::GatewayUnavailable(_) => {
                "Payment provider is unavailable. Please try again.".into()
            }
            _ => "An error occurred processing your invoice.".into(),
        }
    }
}

/// Invoice store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invoice {0} already exists")]
    DuplicateId(InvoiceId),

    #[error("Invoice {0} not found")]
    NotFound(InvoiceId),

    /// The stored state moved on before our compare-and-transition landed
    #[error("Stale state: expected {expected}, found {actual}")]
    StaleState {
        expected: InvoiceState,
        actual: InvoiceState,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: InvoiceState,
        to: InvoiceState,
    },

    #[error("Payment reference {reference} already recorded for invoice {invoice_id}")]
    DuplicatePaymentReference {
        reference: String,
        invoice_id: InvoiceId,
    },

    /// Backing storage failed (I/O, encoding)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// Document rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Render task panicked or was cancelled
    #[error("Render task failed: {0}")]
    Internal(String),
}

/// Document delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Recipient address rejected by the channel; do not retry
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Network or rate-limit failure; may retry with backoff
    #[error("Transient failure: {0}")]
    TransientFailure(String),

    #[error("Payload too large: {size} bytes (max: {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::TransientFailure(_))
    }
}

/// Payment gateway errors
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Gateway could not be reached or answered with a server error
    #[error("{0}")]
    Unavailable(String),

    /// Gateway understood the request and refused it
    #[error("Request rejected: {0}")]
    Rejected(String),
}

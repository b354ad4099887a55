//! Application State

use std::sync::Arc;

use invoice_core::InvoiceLifecycle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Invoice state machine
    pub lifecycle: Arc<InvoiceLifecycle>,

    /// Webhook secret (None disables the header check)
    pub webhook_secret: Option<Arc<str>>,
}

//! Mock Payment Gateway
//!
//! For testing and local runs. Mints deterministic links and can be switched
//! offline to exercise the unavailable path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{PayableLinkRequest, PaymentGateway};
use crate::error::GatewayError;
use crate::model::PayableLink;

/// Mock gateway recording every link request
pub struct MockPaymentGateway {
    available: AtomicBool,
    requests: Mutex<Vec<PayableLinkRequest>>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Toggle whether link creation succeeds
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<PayableLinkRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_payable_link(
        &self,
        request: &PayableLinkRequest,
    ) -> Result<PayableLink, GatewayError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock gateway offline".into()));
        }

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        Ok(PayableLink {
            url: format!("https://pay.example/{}", request.invoice_id),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}

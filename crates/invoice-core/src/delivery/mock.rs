//! Mock Delivery Channel
//!
//! Records every delivered document. Failures can be queued up front and are
//! returned in order before deliveries start succeeding.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{DeliveryChannel, DeliveryMetadata};
use crate::error::DeliveryError;
use crate::model::{ChannelAddress, DeliveryReceipt};
use crate::render::RenderedDocument;

/// A document the mock accepted
#[derive(Clone, Debug)]
pub struct RecordedDelivery {
    pub address: ChannelAddress,
    pub metadata: DeliveryMetadata,
    pub size: usize,
}

/// Mock channel with scripted failures
pub struct MockDeliveryChannel {
    failures: Mutex<VecDeque<DeliveryError>>,
    deliveries: Mutex<Vec<RecordedDelivery>>,
    attempts: AtomicU32,
    latency: Duration,
}

impl Default for MockDeliveryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeliveryChannel {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Simulate a slow channel (for testing overlapping webhook deliveries)
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            deliveries: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            latency,
        }
    }

    /// Queue a failure for the next attempt
    pub fn fail_next(&self, error: DeliveryError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Successful deliveries so far
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attempts so far, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for MockDeliveryChannel {
    async fn deliver(
        &self,
        address: &ChannelAddress,
        document: &RenderedDocument,
        metadata: &DeliveryMetadata,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedDelivery {
                address: address.clone(),
                metadata: metadata.clone(),
                size: document.len(),
            });

        Ok(DeliveryReceipt {
            reference: format!("mock-{attempt}"),
            document_ref: Some(format!("file-{}", metadata.invoice_id)),
        })
    }

    fn name(&self) -> &str {
        "MockChannel"
    }
}

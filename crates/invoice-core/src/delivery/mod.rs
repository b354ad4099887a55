//! Document Delivery
//!
//! Channel abstraction plus the bounded retry used for transient failures.

mod mock;

pub use mock::MockDeliveryChannel;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::model::{ChannelAddress, DeliveryReceipt, InvoiceId};
use crate::render::RenderedDocument;

/// Details sent alongside the document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub invoice_id: InvoiceId,

    /// File name shown to the recipient
    pub file_name: String,

    pub caption: String,
}

/// Delivery channel trait (Strategy pattern)
///
/// The lifecycle calls `deliver` at most once per invoice (plus retries of a
/// transient failure); implementations need not deduplicate.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(
        &self,
        address: &ChannelAddress,
        document: &RenderedDocument,
        metadata: &DeliveryMetadata,
    ) -> Result<DeliveryReceipt, DeliveryError>;

    /// Channel name
    fn name(&self) -> &str;
}

/// Bounded exponential backoff for transient delivery failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    pub initial_interval: Duration,

    pub max_interval: Duration,

    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up after the first failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Millisecond backoffs, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Deliver a document, retrying `TransientFailure` up to the policy's attempt
/// budget. Fatal errors and the last transient error are returned as-is.
pub async fn deliver_with_retry(
    channel: &dyn DeliveryChannel,
    policy: &RetryPolicy,
    address: &ChannelAddress,
    document: &RenderedDocument,
    metadata: &DeliveryMetadata,
) -> Result<DeliveryReceipt, DeliveryError> {
    let max_attempts = policy.max_attempts.max(1);
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;

    backoff::future::retry(policy.backoff(), move || async move {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match channel.deliver(address, document, metadata).await {
            Ok(receipt) => Ok(receipt),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    invoice_id = %metadata.invoice_id,
                    channel = channel.name(),
                    attempt,
                    error = %e,
                    "Delivery failed, retrying"
                );
                Err(backoff::Error::transient(e))
            }
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    })
    .await
}

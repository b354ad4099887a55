//! Telegram Error Types

use invoice_core::{DeliveryError, GatewayError};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, TelegramError>;

/// Telegram Bot API errors
#[derive(Error, Debug)]
pub enum TelegramError {
    /// Transport failure (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bot API answered `ok: false`
    #[error("Bot API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },

    /// Bot API answered `ok: true` without a result
    #[error("Bot API returned no result for {0}")]
    MissingResult(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TelegramError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TelegramError::Http(_) => true,
            TelegramError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    fn description_contains(&self, needles: &[&str]) -> bool {
        match self {
            TelegramError::Api { description, .. } => {
                let description = description.to_lowercase();
                needles.iter().any(|needle| description.contains(needle))
            }
            _ => false,
        }
    }

    /// Classify for the delivery retry loop. `size` is the document size.
    pub fn into_delivery_error(self, size: usize, limit: usize) -> DeliveryError {
        if self.is_retryable() {
            return DeliveryError::TransientFailure(self.to_string());
        }

        let too_large = matches!(self, TelegramError::Api { code: 413, .. })
            || self.description_contains(&["too big", "too large"]);
        if too_large {
            return DeliveryError::PayloadTooLarge { size, limit };
        }

        // Remaining 4xx answers (chat not found, bot blocked, bad chat id) are
        // all tied to the recipient and will not succeed on retry.
        DeliveryError::InvalidAddress(self.to_string())
    }

    /// Classify for payable-link creation
    pub fn into_gateway_error(self) -> GatewayError {
        if self.is_retryable() {
            GatewayError::Unavailable(self.to_string())
        } else {
            GatewayError::Rejected(self.to_string())
        }
    }
}

//! Server Configuration

use std::path::PathBuf;

use invoice_core::{Currency, LifecycleConfig, RetryPolicy};

/// Settings read from the environment at startup
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,

    /// Secret the gateway echoes in `X-Telegram-Bot-Api-Secret-Token`
    pub webhook_secret: Option<String>,

    /// Public URL of this service; the webhook is registered when set
    pub public_base_url: Option<String>,

    /// Allowed CORS origin (any when unset)
    pub cors_allowed_origin: Option<String>,

    /// Directory for the durable store (in-memory when unset)
    pub store_dir: Option<PathBuf>,

    /// Currency payable links are issued in
    pub currency: Currency,

    /// Delivery attempts before an invoice is marked failed
    pub delivery_max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            webhook_secret: None,
            public_base_url: None,
            cors_allowed_origin: None,
            store_dir: None,
            currency: Currency::default(),
            delivery_max_attempts: RetryPolicy::default().max_attempts,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = non_empty("BIND_ADDR")
            .or_else(|| non_empty("PORT").map(|port| format!("0.0.0.0:{port}")))
            .unwrap_or(defaults.bind_addr);

        let delivery_max_attempts = non_empty("DELIVERY_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(defaults.delivery_max_attempts);

        Self {
            bind_addr,
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            public_base_url: non_empty("PUBLIC_BASE_URL"),
            cors_allowed_origin: non_empty("CORS_ALLOWED_ORIGIN"),
            store_dir: non_empty("INVOICE_STORE_DIR").map(PathBuf::from),
            currency: non_empty("PAYMENT_CURRENCY").map_or(defaults.currency, Currency::new),
            delivery_max_attempts,
        }
    }

    /// Lifecycle settings derived from this configuration
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            currency: self.currency.clone(),
            retry: RetryPolicy {
                max_attempts: self.delivery_max_attempts,
                ..RetryPolicy::default()
            },
            ..LifecycleConfig::default()
        }
    }

    /// URL the bot webhook is registered at
    pub fn webhook_url(&self) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(|base| format!("{}/webhook/telegram", base.trim_end_matches('/')))
    }
}

//! # invoice-telegram
//!
//! Telegram Bot API adapter: native invoice links (`PaymentGateway`), document
//! upload (`DeliveryChannel`) and webhook update parsing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invoice_telegram::TelegramClient;
//!
//! let client = Arc::new(TelegramClient::from_env()?);
//! client.set_webhook("https://bot.example/webhook/telegram", Some(&secret)).await?;
//!
//! // Pass the same client as gateway and channel
//! let lifecycle = InvoiceLifecycle::new(store, client.clone(), renderer, client, config);
//! ```

pub mod client;
pub mod error;
pub mod webhook;

pub use client::{MAX_DOCUMENT_BYTES, TelegramClient, TelegramConfig};
pub use error::{Result, TelegramError};
pub use webhook::{PreCheckoutAnswer, SECRET_TOKEN_HEADER, Update, WebhookEvent};

//! Telegram Bot API Client
//!
//! Implements `PaymentGateway` through `createInvoiceLink` and `DeliveryChannel`
//! through `sendDocument`.

use std::time::Duration;

use async_trait::async_trait;
use invoice_core::{
    ChannelAddress, DeliveryChannel, DeliveryError, DeliveryMetadata, DeliveryReceipt,
    GatewayError, PayableLink, PayableLinkRequest, PaymentGateway, RenderedDocument,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TelegramError};

/// Bot API limit for documents sent by bots
pub const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// Telegram client configuration
#[derive(Clone, Debug)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub bot_token: String,

    /// Bot API base URL
    pub api_url: String,

    /// Payment provider token; empty for Telegram Stars (`XTR`)
    pub provider_token: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: "https://api.telegram.org".into(),
            provider_token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl TelegramConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| TelegramError::Config("TELEGRAM_BOT_TOKEN not set".into()))?;
        let api_url = std::env::var("TELEGRAM_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".into());
        let provider_token = std::env::var("TELEGRAM_PROVIDER_TOKEN").unwrap_or_default();
        let timeout_secs = std::env::var("TELEGRAM_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            bot_token,
            api_url,
            provider_token,
            timeout_secs,
        })
    }
}

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LabeledPrice<'a> {
    label: &'a str,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceLink<'a> {
    title: &'a str,
    description: &'a str,
    payload: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    provider_token: &'a str,
    currency: &'a str,
    prices: Vec<LabeledPrice<'a>>,
}

#[derive(Debug, Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: &'a [&'a str],
}

/// Sent message (only the fields we use)
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
    #[serde(default)]
    pub document: Option<SentDocument>,
}

#[derive(Debug, Deserialize)]
pub struct SentDocument {
    pub file_id: String,
}

/// Telegram Bot API client
pub struct TelegramClient {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramClient {
    /// Create from configuration
    pub fn from_config(config: TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(TelegramError::Config("bot token is empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(TelegramConfig::from_env()?)
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Unwrap the Bot API envelope
    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
        method: &'static str,
    ) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await?;

        if !body.ok {
            warn!(
                method,
                status = status.as_u16(),
                description = body.description.as_deref().unwrap_or_default(),
                "Bot API call failed"
            );
            return Err(TelegramError::Api {
                code: body.error_code.unwrap_or(status.as_u16()),
                description: body.description.unwrap_or_else(|| status.to_string()),
                retry_after: body.parameters.and_then(|p| p.retry_after),
            });
        }

        body.result.ok_or(TelegramError::MissingResult(method))
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<T> {
        debug!(method, "Calling Bot API");
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        Self::read_response(response, method).await
    }

    /// Create a native invoice link; the payload carries our invoice id
    pub async fn create_invoice_link(&self, request: &PayableLinkRequest) -> Result<String> {
        let title = truncate_chars(&request.title, 32);
        let description = truncate_chars(&request.description, 255);

        let body = CreateInvoiceLink {
            title: &title,
            description: &description,
            payload: request.invoice_id.as_str(),
            provider_token: &self.config.provider_token,
            currency: request.currency.code(),
            prices: vec![LabeledPrice {
                label: &title,
                amount: request.amount,
            }],
        };

        self.call("createInvoiceLink", &body).await
    }

    /// Upload a document to a chat
    pub async fn send_document(
        &self,
        chat_id: &str,
        document: &RenderedDocument,
        file_name: &str,
        caption: &str,
    ) -> Result<SentMessage> {
        let part = Part::bytes(document.bytes.clone())
            .file_name(file_name.to_string())
            .mime_str(document.content_type)?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        debug!(chat_id, size = document.len(), "Uploading document");
        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        Self::read_response(response, "sendDocument").await
    }

    /// Point the bot's webhook at `url`, limited to the updates we handle
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<bool> {
        let body = SetWebhook {
            url,
            secret_token,
            allowed_updates: &["message", "pre_checkout_query"],
        };

        self.call("setWebhook", &body).await
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl PaymentGateway for TelegramClient {
    async fn create_payable_link(
        &self,
        request: &PayableLinkRequest,
    ) -> std::result::Result<PayableLink, GatewayError> {
        let url = self
            .create_invoice_link(request)
            .await
            .map_err(TelegramError::into_gateway_error)?;

        Ok(PayableLink {
            url,
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }

    fn name(&self) -> &str {
        "Telegram"
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn deliver(
        &self,
        address: &ChannelAddress,
        document: &RenderedDocument,
        metadata: &DeliveryMetadata,
    ) -> std::result::Result<DeliveryReceipt, DeliveryError> {
        if document.len() > MAX_DOCUMENT_BYTES {
            return Err(DeliveryError::PayloadTooLarge {
                size: document.len(),
                limit: MAX_DOCUMENT_BYTES,
            });
        }

        let sent = self
            .send_document(
                address.as_str(),
                document,
                &metadata.file_name,
                &metadata.caption,
            )
            .await
            .map_err(|e| e.into_delivery_error(document.len(), MAX_DOCUMENT_BYTES))?;

        Ok(DeliveryReceipt {
            reference: sent.message_id.to_string(),
            document_ref: sent.document.map(|d| d.file_id),
        })
    }

    fn name(&self) -> &str {
        "Telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoice_core::{Currency, InvoiceId};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:ABC";

    fn client_for(server: &MockServer) -> TelegramClient {
        TelegramClient::from_config(TelegramConfig {
            bot_token: TOKEN.into(),
            api_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    fn link_request() -> PayableLinkRequest {
        PayableLinkRequest {
            invoice_id: InvoiceId::from_string("inv_1_abcdef12"),
            amount: 100,
            currency: Currency::new("XTR"),
            title: "Invoice PDF".into(),
            description: "A PDF invoice generated from your data".into(),
        }
    }

    fn document() -> RenderedDocument {
        RenderedDocument {
            bytes: b"%PDF-1.5 test".to_vec(),
            content_type: "application/pdf",
        }
    }

    fn metadata() -> DeliveryMetadata {
        DeliveryMetadata {
            invoice_id: InvoiceId::from_string("inv_1_abcdef12"),
            file_name: "invoice.pdf".into(),
            caption: "Here is your generated invoice!".into(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = TelegramConfig::default();
        assert_eq!(config.api_url, "https://api.telegram.org");
        assert!(config.provider_token.is_empty());
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = TelegramClient::from_config(TelegramConfig::default());
        assert!(matches!(result, Err(TelegramError::Config(_))));
    }

    #[tokio::test]
    async fn test_create_payable_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/createInvoiceLink")))
            .and(body_partial_json(json!({
                "payload": "inv_1_abcdef12",
                "currency": "XTR",
                "prices": [{ "label": "Invoice PDF", "amount": 100 }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": "https://t.me/$abc123",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let link = client_for(&server)
            .create_payable_link(&link_request())
            .await
            .unwrap();

        assert_eq!(link.url, "https://t.me/$abc123");
        assert_eq!(link.amount, 100);
    }

    #[tokio::test]
    async fn test_gateway_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/createInvoiceLink")))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "ok": false,
                "error_code": 502,
                "description": "Bad Gateway",
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).create_payable_link(&link_request()).await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_deliver_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendDocument")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "message_id": 77,
                    "chat": { "id": 42, "type": "private" },
                    "date": 1700000000,
                    "document": { "file_id": "BQACAgIAAxk", "file_unique_id": "AgAD" },
                },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client_for(&server)
            .deliver(&ChannelAddress::new("42"), &document(), &metadata())
            .await
            .unwrap();

        assert_eq!(receipt.reference, "77");
        assert_eq!(receipt.document_ref.as_deref(), Some("BQACAgIAAxk"));
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendDocument")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found",
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .deliver(&ChannelAddress::new("-1"), &document(), &metadata())
            .await;

        assert!(matches!(result, Err(DeliveryError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_deliver_rate_limited_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendDocument")))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 1",
                "parameters": { "retry_after": 1 },
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .deliver(&ChannelAddress::new("42"), &document(), &metadata())
            .await;

        assert!(matches!(result, Err(DeliveryError::TransientFailure(_))));
    }

    #[tokio::test]
    async fn test_oversized_document_is_rejected_locally() {
        let server = MockServer::start().await;
        let oversized = RenderedDocument {
            bytes: vec![0; MAX_DOCUMENT_BYTES + 1],
            content_type: "application/pdf",
        };

        let result = client_for(&server)
            .deliver(&ChannelAddress::new("42"), &oversized, &metadata())
            .await;

        assert!(matches!(result, Err(DeliveryError::PayloadTooLarge { .. })));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_set_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/setWebhook")))
            .and(body_partial_json(json!({
                "url": "https://bot.example/webhook/telegram",
                "secret_token": "s3cret",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": true,
                "description": "Webhook was set",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let set = client_for(&server)
            .set_webhook("https://bot.example/webhook/telegram", Some("s3cret"))
            .await
            .unwrap();
        assert!(set);
    }
}

//! invoice-bot HTTP Server
//!
//! Axum server exposing the invoice API and the payment webhooks. Payable
//! links and document delivery go through the Telegram Bot API.

mod config;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoice_core::{FileInvoiceStore, InvoiceLifecycle, InvoiceStore, MemoryInvoiceStore, PdfRenderer};
use invoice_telegram::TelegramClient;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    // Invoice store
    let store: Arc<dyn InvoiceStore> = match &config.store_dir {
        Some(dir) => {
            let store = FileInvoiceStore::open(dir)?;
            tracing::info!(dir = %dir.display(), "✓ File invoice store opened");
            Arc::new(store)
        }
        None => {
            tracing::warn!("⚠ INVOICE_STORE_DIR not set - invoices are kept in memory only");
            Arc::new(MemoryInvoiceStore::new())
        }
    };

    // Telegram acts as both payment gateway and delivery channel
    let telegram = Arc::new(TelegramClient::from_env()?);
    tracing::info!(currency = %config.currency, "✓ Telegram client configured");

    if config.webhook_secret.is_none() {
        tracing::warn!("⚠ WEBHOOK_SECRET not set - webhook calls are not authenticated");
    }

    if let Some(url) = config.webhook_url() {
        match telegram
            .set_webhook(&url, config.webhook_secret.as_deref())
            .await
        {
            Ok(_) => tracing::info!(url = %url, "✓ Telegram webhook registered"),
            Err(e) => tracing::warn!(error = %e, "⚠ Could not register Telegram webhook"),
        }
    }

    let lifecycle = InvoiceLifecycle::new(
        store,
        telegram.clone(),
        Arc::new(PdfRenderer::new()),
        telegram,
        config.lifecycle_config(),
    );

    // Build application state
    let state = AppState {
        lifecycle: Arc::new(lifecycle),
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
    };

    let app = routes::router(state, config.cors_allowed_origin.as_deref());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 invoice-bot server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /healthz                         - Health check");
    tracing::info!("  POST /invoices                        - Create invoice + payable link");
    tracing::info!("  GET  /invoices?state=failed           - List invoices by state");
    tracing::info!("  GET  /invoices/{{id}}                   - Invoice status");
    tracing::info!("  POST /invoices/{{id}}/payment-link      - Retry payable link");
    tracing::info!("  POST /payment-events/pre-checkout     - Pre-checkout webhook");
    tracing::info!("  POST /payment-events/confirmed        - Payment webhook");
    tracing::info!("  POST /webhook/telegram                - Bot API webhook");

    axum::serve(listener, app).await?;

    Ok(())
}

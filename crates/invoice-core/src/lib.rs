//! # invoice-core
//!
//! Invoice lifecycle for pay-then-deliver document bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     InvoiceLifecycle                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ InvoiceStore │  │   Document   │  │  PaymentGateway    │  │
//! │  │ (compare-and │──│   Renderer   │──│  DeliveryChannel   │  │
//! │  │  transition) │  │    (PDF)     │  │   (Strategy)       │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invoice_core::{InvoiceLifecycle, LifecycleConfig, MemoryInvoiceStore, PdfRenderer};
//!
//! let lifecycle = InvoiceLifecycle::new(
//!     Arc::new(MemoryInvoiceStore::new()),
//!     gateway,
//!     Arc::new(PdfRenderer::new()),
//!     channel,
//!     LifecycleConfig::default(),
//! );
//!
//! let invoice = lifecycle.request_invoice(request)?;
//! let link = lifecycle.issue_payment_link(&invoice.id).await?;
//! // ... gateway webhooks call handle_pre_checkout / handle_payment_confirmed
//! ```

pub mod delivery;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod render;
pub mod store;

pub use delivery::{DeliveryChannel, DeliveryMetadata, RetryPolicy};
pub use error::{DeliveryError, GatewayError, InvoiceError, RenderError, Result, StoreError};
pub use gateway::{PayableLinkRequest, PaymentConfirmed, PaymentGateway, PreCheckout, PreCheckoutDecision};
pub use lifecycle::{InvoiceLifecycle, InvoiceRequest, LifecycleConfig, PaymentOutcome};
pub use model::{
    ChannelAddress, Currency, DeliveryReceipt, Invoice, InvoiceId, InvoiceState, LineItem,
    PayableLink, Party, PaymentReference, Transition,
};
pub use render::{DocumentRenderer, PdfRenderer, RenderedDocument};
pub use store::{FileInvoiceStore, InvoiceStore, MemoryInvoiceStore};

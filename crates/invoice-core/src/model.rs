//! Invoice Data Model
//!
//! The invoice entity, its line items and the lifecycle states it moves through.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StoreError;

/// Invoice identifier (formatted: inv_<unix millis>_<8 hex chars>)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(String);

impl InvoiceId {
    /// Generate a new identifier from the current time and a random suffix
    pub fn generate() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "inv_{}_{}",
            Utc::now().timestamp_millis(),
            &suffix[..8]
        ))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque channel address of the recipient (a chat id for bot channels)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Chat ids arrive as JSON numbers from bot clients and as strings elsewhere.
impl<'de> Deserialize<'de> for ChannelAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

/// Unique reference of a captured payment, issued by the gateway
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display-only name/contact pair for issuer and bill-to blocks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,

    #[serde(default, alias = "email")]
    pub contact: String,
}

impl Party {
    pub fn new(name: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: contact.into(),
        }
    }
}

/// A single invoiced line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,

    #[serde(alias = "amount")]
    pub quantity: Decimal,

    #[serde(alias = "price")]
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Check that line items can be invoiced: non-empty, positive quantities,
/// non-negative prices.
pub fn validate_line_items(items: &[LineItem]) -> std::result::Result<(), String> {
    if items.is_empty() {
        return Err("at least one line item is required".into());
    }

    for (index, item) in items.iter().enumerate() {
        if item.quantity <= Decimal::ZERO {
            return Err(format!(
                "line {}: quantity must be positive, got {}",
                index + 1,
                item.quantity
            ));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(format!(
                "line {}: unit price must not be negative, got {}",
                index + 1,
                item.unit_price
            ));
        }
        if item.quantity.checked_mul(item.unit_price).is_none() {
            return Err(format!("line {}: amount overflows", index + 1));
        }
    }

    if checked_total(items).is_none() {
        return Err("total overflows".into());
    }

    Ok(())
}

/// Sum of quantity × unit price, `None` on overflow
pub fn checked_total(items: &[LineItem]) -> Option<Decimal> {
    items.iter().try_fold(Decimal::ZERO, |total, item| {
        total.checked_add(item.quantity.checked_mul(item.unit_price)?)
    })
}

/// Sum of quantity × unit price over all lines.
///
/// Panics on overflow; only call on items that passed `validate_line_items`.
pub fn total_of(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::line_total).sum()
}

/// Round an amount to two decimals for display, half away from zero
pub fn round_for_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// ISO-4217-style currency code (plus `XTR` for Telegram Stars)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal digits in the currency's smallest unit
    pub fn minor_unit_exponent(&self) -> u32 {
        match self.0.as_str() {
            "XTR" | "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
            _ => 2,
        }
    }

    /// Convert a decimal amount into the smallest currency unit
    pub fn to_minor_units(&self, amount: Decimal) -> Option<i64> {
        let scale = Decimal::from(10_i64.checked_pow(self.minor_unit_exponent())?);
        amount
            .checked_mul(scale)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("XTR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoice lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Created,
    AwaitingPayment,
    Paid,
    Delivered,
    Failed,
}

impl InvoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::Created => "created",
            InvoiceState::AwaitingPayment => "awaiting_payment",
            InvoiceState::Paid => "paid",
            InvoiceState::Delivered => "delivered",
            InvoiceState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(InvoiceState::Created),
            "awaiting_payment" => Some(InvoiceState::AwaitingPayment),
            "paid" => Some(InvoiceState::Paid),
            "delivered" => Some(InvoiceState::Delivered),
            "failed" => Some(InvoiceState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceState::Delivered | InvoiceState::Failed)
    }

    /// Transitions move forward one step along
    /// Created → AwaitingPayment → Paid → Delivered, or to Failed from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: InvoiceState) -> bool {
        match (self, next) {
            (from, InvoiceState::Failed) => !from.is_terminal(),
            (InvoiceState::Created, InvoiceState::AwaitingPayment)
            | (InvoiceState::AwaitingPayment, InvoiceState::Paid)
            | (InvoiceState::Paid, InvoiceState::Delivered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link the payer follows to settle an invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableLink {
    pub url: String,

    /// Amount in the currency's smallest unit
    pub amount: i64,

    pub currency: Currency,
}

/// Proof that a document reached the recipient's channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Channel-side message reference
    pub reference: String,

    /// Channel-side handle to the stored document, if the channel exposes one
    #[serde(default)]
    pub document_ref: Option<String>,
}

/// A state change together with the fields it records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    AwaitPayment {
        link: PayableLink,
    },
    RecordPayment {
        reference: PaymentReference,
        paid_at: DateTime<Utc>,
    },
    MarkDelivered {
        receipt: DeliveryReceipt,
        delivered_at: DateTime<Utc>,
    },
    MarkFailed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl Transition {
    /// State the invoice lands in once this transition is applied
    pub fn target(&self) -> InvoiceState {
        match self {
            Transition::AwaitPayment { .. } => InvoiceState::AwaitingPayment,
            Transition::RecordPayment { .. } => InvoiceState::Paid,
            Transition::MarkDelivered { .. } => InvoiceState::Delivered,
            Transition::MarkFailed { .. } => InvoiceState::Failed,
        }
    }

    /// Payment reference recorded by this transition, if any
    pub fn payment_reference(&self) -> Option<&PaymentReference> {
        match self {
            Transition::RecordPayment { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

/// An invoice record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,

    /// Where the rendered document goes once paid
    pub recipient: ChannelAddress,

    pub line_items: Vec<LineItem>,

    pub issuer: Party,

    pub bill_to: Party,

    pub state: InvoiceState,

    /// Link minted by the payment gateway
    #[serde(default)]
    pub payment_link: Option<PayableLink>,

    /// Set once when a payment event is matched to this invoice
    #[serde(default)]
    pub payment_reference: Option<PaymentReference>,

    #[serde(default)]
    pub delivery_receipt: Option<DeliveryReceipt>,

    /// Why the invoice ended up in `Failed`
    #[serde(default)]
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Create a new invoice in the `Created` state
    pub fn new(
        recipient: ChannelAddress,
        line_items: Vec<LineItem>,
        issuer: Party,
        bill_to: Party,
    ) -> Self {
        Self {
            id: InvoiceId::generate(),
            recipient,
            line_items,
            issuer,
            bill_to,
            state: InvoiceState::Created,
            payment_link: None,
            payment_reference: None,
            delivery_receipt: None,
            failure_reason: None,
            created_at: Utc::now(),
            paid_at: None,
            delivered_at: None,
            failed_at: None,
        }
    }

    /// Computed total, never stored
    pub fn total(&self) -> Decimal {
        total_of(&self.line_items)
    }

    /// Total in the smallest unit of `currency`
    pub fn amount_in(&self, currency: &Currency) -> Option<i64> {
        currency.to_minor_units(self.total())
    }

    /// Apply a transition, recording its fields.
    ///
    /// Timestamps are clamped so that `created_at <= paid_at <= delivered_at`
    /// holds even if the wall clock steps backwards.
    pub fn apply(&mut self, transition: Transition) -> std::result::Result<(), StoreError> {
        let target = transition.target();
        if !self.state.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }

        match transition {
            Transition::AwaitPayment { link } => {
                self.payment_link = Some(link);
            }
            Transition::RecordPayment { reference, paid_at } => {
                self.payment_reference = Some(reference);
                self.paid_at = Some(paid_at.max(self.created_at));
            }
            Transition::MarkDelivered {
                receipt,
                delivered_at,
            } => {
                let floor = self.paid_at.unwrap_or(self.created_at);
                self.delivery_receipt = Some(receipt);
                self.delivered_at = Some(delivered_at.max(floor));
            }
            Transition::MarkFailed { reason, failed_at } => {
                let floor = self.paid_at.unwrap_or(self.created_at);
                self.failure_reason = Some(reason);
                self.failed_at = Some(failed_at.max(floor));
            }
        }

        self.state = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_invoice() -> Invoice {
        Invoice::new(
            ChannelAddress::new("42"),
            vec![LineItem::new("Design", dec!(2), dec!(50.0))],
            Party::new("Studio", "studio@example.com"),
            Party::new("Client", "client@example.com"),
        )
    }

    #[test]
    fn test_invoice_id_format() {
        let id = InvoiceId::generate();
        let parts: Vec<_> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "inv");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(id, InvoiceId::generate());
    }

    #[test]
    fn test_total() {
        let mut invoice = sample_invoice();
        invoice
            .line_items
            .push(LineItem::new("Review", dec!(1.5), dec!(10.10)));
        assert_eq!(invoice.total(), dec!(115.15));
    }

    #[test]
    fn test_validation_rejects_bad_items() {
        assert!(validate_line_items(&[]).is_err());
        assert!(validate_line_items(&[LineItem::new("x", dec!(-1), dec!(1))]).is_err());
        assert!(validate_line_items(&[LineItem::new("x", dec!(0), dec!(1))]).is_err());
        assert!(validate_line_items(&[LineItem::new("x", dec!(1), dec!(-0.01))]).is_err());
        assert!(validate_line_items(&[LineItem::new("free", dec!(1), dec!(0))]).is_ok());
    }

    #[test]
    fn test_validation_rejects_overflowing_total() {
        let near_max = dec!(50000000000000000000000000000);
        let items = [
            LineItem::new("a", dec!(1), near_max),
            LineItem::new("b", dec!(1), near_max),
        ];

        assert!(validate_line_items(&items[..1]).is_ok());
        assert_eq!(checked_total(&items), None);
        assert_eq!(validate_line_items(&items), Err("total overflows".into()));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Currency::new("usd").to_minor_units(dec!(100.005)), Some(10001));
        assert_eq!(Currency::new("XTR").to_minor_units(dec!(99.5)), Some(100));
        assert_eq!(Currency::new("EUR").minor_unit_exponent(), 2);
    }

    #[test]
    fn test_state_machine_is_monotonic() {
        use InvoiceState::*;
        assert!(Created.can_transition_to(AwaitingPayment));
        assert!(!Created.can_transition_to(Paid));
        assert!(AwaitingPayment.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Delivered));
        assert!(!Paid.can_transition_to(AwaitingPayment));
    }

    #[test]
    fn test_apply_records_fields() {
        let mut invoice = sample_invoice();
        let err = invoice
            .apply(Transition::RecordPayment {
                reference: PaymentReference::new("ch_1"),
                paid_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(invoice.state, InvoiceState::Created);

        let link = PayableLink {
            url: "https://t.me/$abc".into(),
            amount: 100,
            currency: Currency::default(),
        };
        invoice.apply(Transition::AwaitPayment { link: link.clone() }).unwrap();
        assert_eq!(invoice.payment_link, Some(link));

        let earlier = invoice.created_at - chrono::Duration::seconds(5);
        invoice
            .apply(Transition::RecordPayment {
                reference: PaymentReference::new("ch_1"),
                paid_at: earlier,
            })
            .unwrap();
        assert_eq!(invoice.state, InvoiceState::Paid);
        assert_eq!(invoice.paid_at, Some(invoice.created_at));
    }

    #[test]
    fn test_channel_address_accepts_numbers() {
        let address: ChannelAddress = serde_json::from_str("123456789").unwrap();
        assert_eq!(address.as_str(), "123456789");

        let address: ChannelAddress = serde_json::from_str("\"@studio\"").unwrap();
        assert_eq!(address.as_str(), "@studio");
    }

    #[test]
    fn test_line_item_accepts_legacy_field_names() {
        let item: LineItem =
            serde_json::from_str(r#"{"description":"Design","amount":2,"price":50.0}"#).unwrap();
        assert_eq!(item.line_total(), dec!(100));
    }
}

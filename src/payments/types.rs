//! Payment and payout records plus the data exchanged with backends
//!
//! Common types shared by every backend implementation.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payments::error::PaymentError;
use crate::payments::lifecycle::{PaymentEvent, PayoutEvent};

/// Status of a payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, nothing sent to the gateway yet
    New,
    /// Order registered with the gateway
    Prepared,
    /// Amount reserved by the gateway, waiting for capture
    Locked,
    /// Gateway is processing the payment
    InProgress,
    /// Less than the required amount has been paid
    PartiallyPaid,
    /// Required amount has been paid
    Paid,
    Failed,
    /// Refund requested, waiting for gateway confirmation
    RefundStarted,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::New => "new",
            PaymentStatus::Prepared => "prepared",
            PaymentStatus::Locked => "locked",
            PaymentStatus::InProgress => "in_progress",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::RefundStarted => "refund_started",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// No further transition is ever accepted from these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::Cancelled
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PaymentStatus::New),
            "prepared" => Ok(PaymentStatus::Prepared),
            "locked" => Ok(PaymentStatus::Locked),
            "in_progress" => Ok(PaymentStatus::InProgress),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refund_started" => Ok(PaymentStatus::RefundStarted),
            "refunded" => Ok(PaymentStatus::Refunded),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(PaymentError::invalid_request(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Status of a payout record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    New,
    /// Accepted by the gateway, not settled yet
    Pending,
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::New => "new",
            PayoutStatus::Pending => "pending",
            PayoutStatus::Success => "success",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Success | PayoutStatus::Failed)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PayoutStatus::New),
            "pending" => Ok(PayoutStatus::Pending),
            "success" => Ok(PayoutStatus::Success),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(PaymentError::invalid_request(format!(
                "Unknown payout status '{}'",
                other
            ))),
        }
    }
}

/// One attempt to collect money for an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    /// Merchant-side order reference
    pub order_id: String,
    /// Slug of the backend owning this payment
    pub backend: String,
    pub description: String,
    /// ISO-4217 currency code
    pub currency: String,
    pub amount_required: Decimal,
    pub amount_locked: Decimal,
    pub amount_paid: Decimal,
    pub amount_refunded: Decimal,
    /// Amount of the refund currently waiting for gateway confirmation
    pub pending_refund: Option<Decimal>,
    pub status: PaymentStatus,
    /// Order identifier assigned by the gateway
    pub external_id: Option<String>,
    /// Bumped on every persisted change
    pub version: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub last_payment_on: Option<DateTime<Utc>>,
    pub refunded_on: Option<DateTime<Utc>>,
}

/// Input for registering a new payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub order_id: String,
    pub backend: String,
    pub description: String,
    pub currency: String,
    pub amount: Decimal,
}

impl Payment {
    pub fn new(input: NewPayment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: input.order_id,
            backend: input.backend,
            description: input.description,
            currency: input.currency.to_uppercase(),
            amount_required: input.amount,
            amount_locked: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            amount_refunded: Decimal::ZERO,
            pending_refund: None,
            status: PaymentStatus::New,
            external_id: None,
            version: 0,
            created_on: now,
            updated_on: now,
            last_payment_on: None,
            refunded_on: None,
        }
    }

    /// Amount that can still be refunded
    pub fn refundable_amount(&self) -> Decimal {
        self.amount_paid - self.amount_refunded
    }
}

/// One attempt to disburse money to a payee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub backend: String,
    pub shop_id: String,
    pub customer_name: String,
    pub description: String,
    /// `None` pays out everything available on the shop balance
    pub amount: Option<Decimal>,
    pub ext_customer_id: Option<String>,
    pub currency_code: String,
    pub external_id: Option<String>,
    pub status: PayoutStatus,
    /// Reason of failure reported by the gateway
    pub failed_code: Option<String>,
    pub version: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// Input for registering a new payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayout {
    pub backend: String,
    pub shop_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub ext_customer_id: Option<String>,
    #[serde(default = "default_payout_currency")]
    pub currency_code: String,
}

fn default_payout_currency() -> String {
    "PLN".to_string()
}

impl Payout {
    pub fn new(input: NewPayout) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            backend: input.backend,
            shop_id: input.shop_id,
            customer_name: input.customer_name,
            description: input.description,
            amount: input.amount,
            ext_customer_id: input.ext_customer_id,
            currency_code: input.currency_code.to_uppercase(),
            external_id: None,
            status: PayoutStatus::New,
            failed_code: None,
            version: 0,
            created_on: now,
            updated_on: now,
        }
    }
}

/// Buyer details forwarded to the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Line item of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// Marketplace cart belonging to a single sub-merchant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingCart {
    pub ext_customer_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub products: Vec<ItemInfo>,
}

/// Everything a backend needs besides the payment itself to start checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutContext {
    #[serde(default)]
    pub customer_ip: Option<String>,
    /// Where the gateway should deliver callbacks; filled in by the processor
    #[serde(default)]
    pub notify_url: Option<String>,
    /// Where the buyer returns after leaving the paywall
    #[serde(default)]
    pub continue_url: Option<String>,
    #[serde(default)]
    pub buyer: Option<Buyer>,
    #[serde(default)]
    pub products: Vec<ItemInfo>,
    #[serde(default)]
    pub shopping_carts: Vec<ShoppingCart>,
}

/// Where to send the buyer to complete the payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CheckoutTarget {
    /// Plain HTTP redirect
    Redirect { url: String },
    /// Auto-submitted HTML form
    FormPost {
        url: String,
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutResult {
    pub target: CheckoutTarget,
    /// Order identifier assigned by the gateway, when it assigns one up front
    pub external_id: Option<String>,
}

/// Inbound callback as received by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CallbackRequest {
    pub fn new(headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response the gateway expects in order to treat a delivery as acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAck {
    pub status: u16,
    pub body: String,
}

impl CallbackAck {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: "OK".to_string(),
        }
    }
}

/// What a backend made of a payment callback
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    /// `None` when the notification carries nothing that changes the record
    pub event: Option<PaymentEvent>,
    pub ack: CallbackAck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutCallbackOutcome {
    pub event: Option<PayoutEvent>,
    pub ack: CallbackAck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    /// `true` when the gateway settled the refund synchronously
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeResult {
    pub amount: Decimal,
    /// `true` when the captured money is already confirmed as paid
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutResult {
    pub external_id: String,
    pub event: PayoutEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            PaymentStatus::New,
            PaymentStatus::Prepared,
            PaymentStatus::Locked,
            PaymentStatus::InProgress,
            PaymentStatus::PartiallyPaid,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::RefundStarted,
            PaymentStatus::Refunded,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&PaymentStatus::PartiallyPaid).unwrap();
        assert_eq!(json, "\"partially_paid\"");
    }

    #[test]
    fn test_new_payment_defaults() {
        let payment = Payment::new(NewPayment {
            order_id: "order-1".to_string(),
            backend: "dummy".to_string(),
            description: "Order #1".to_string(),
            currency: "pln".to_string(),
            amount: dec!(100.00),
        });
        assert_eq!(payment.status, PaymentStatus::New);
        assert_eq!(payment.currency, "PLN");
        assert_eq!(payment.amount_paid, Decimal::ZERO);
        assert_eq!(payment.version, 0);
    }

    #[test]
    fn test_new_payout_defaults_currency() {
        let input: NewPayout =
            serde_json::from_str(r#"{"backend":"payu","shop_id":"shop-1"}"#).unwrap();
        let payout = Payout::new(input);
        assert_eq!(payout.currency_code, "PLN");
        assert_eq!(payout.status, PayoutStatus::New);
        assert!(payout.amount.is_none());
    }
}

//! PayU REST API wire types
//!
//! Field names follow the PayU API (camelCase). Every amount is a `Decimal`
//! here and integer minor units on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::payments::amount::minor_units;

pub const DEFAULT_REFUND_DESCRIPTION: &str = "Zwrot";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub grant_type: Option<String>,
}

/// `status` object present in most PayU responses
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayuStatus {
    pub status_code: String,
    #[serde(default)]
    pub status_desc: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Order status as reported by PayU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Pending,
    WaitingForConfirmation,
    Completed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Finalized,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    WaitingForConfirmation,
    Realized,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    #[serde(with = "minor_units")]
    pub unit_price: Decimal,
    #[serde(deserialize_with = "quantity_from_wire")]
    pub quantity: u32,
}

/// PayU answers with quantities as strings
fn quantity_from_wire<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    use serde::de::Error as _;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quantity {
        Int(u32),
        Str(String),
    }

    match Quantity::deserialize(deserializer)? {
        Quantity::Int(q) => Ok(q),
        Quantity::Str(s) => s.trim().parse().map_err(D::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingCart {
    pub ext_customer_id: String,
    #[serde(with = "minor_units")]
    pub amount: Decimal,
    #[serde(
        with = "minor_units::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub ext_order_id: String,
    pub customer_ip: String,
    /// Filled in by the client from its configuration
    pub merchant_pos_id: String,
    pub description: String,
    pub currency_code: String,
    #[serde(with = "minor_units")]
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<Buyer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<Product>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shopping_carts: Vec<ShoppingCart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub status: PayuStatus,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    pub order_id: String,
    #[serde(default)]
    pub ext_order_id: Option<String>,
    /// Echoed order total, when PayU includes it
    #[serde(with = "minor_units::option", default)]
    pub total_amount: Option<Decimal>,
}

/// Order as returned by order retrieval and carried by notifications
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub ext_order_id: Option<String>,
    #[serde(default)]
    pub order_create_date: Option<String>,
    #[serde(default)]
    pub customer_ip: Option<String>,
    #[serde(default)]
    pub merchant_pos_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub currency_code: String,
    #[serde(with = "minor_units")]
    pub total_amount: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub buyer: Option<Buyer>,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfoResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResponse {
    pub order_id: String,
    #[serde(default)]
    pub ext_order_id: Option<String>,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub order_id: String,
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeResponse {
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundData {
    pub description: String,
    pub ext_refund_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_customer_id: Option<String>,
    #[serde(
        with = "minor_units::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub refund: RefundData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub refund_id: String,
    #[serde(default)]
    pub ext_refund_id: Option<String>,
    #[serde(with = "minor_units::option", default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: RefundStatus,
    #[serde(default)]
    pub status_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub order_id: String,
    pub refund: Refund,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopBalance {
    pub currency_code: String,
    #[serde(with = "minor_units")]
    pub total: Decimal,
    #[serde(with = "minor_units")]
    pub available: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopInfoResponse {
    pub shop_id: String,
    pub name: String,
    pub currency_code: String,
    pub balance: ShopBalance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutData {
    pub currency_code: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_payout_id: Option<String>,
    #[serde(
        with = "minor_units::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutAccount {
    pub ext_customer_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerAddress {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub shop_id: String,
    pub payout: PayoutData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<PayoutAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<CustomerAddress>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutInfo {
    pub payout_id: String,
    #[serde(default)]
    pub ext_payout_id: Option<String>,
    pub status: PayoutStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutResponse {
    pub payout: PayoutInfo,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmerchantStatusResponse {
    #[serde(default)]
    pub customer_verification_status: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmerchantBalance {
    #[serde(with = "minor_units")]
    pub available_amount: Decimal,
    #[serde(with = "minor_units")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmerchantBalanceResponse {
    pub balance: SubmerchantBalance,
    pub status: PayuStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "minor_units")]
    pub amount: Decimal,
    pub currency_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageResponse {
    pub records: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmerchantOperationsResponse {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub page_response: Option<PageResponse>,
    pub status: PayuStatus,
}

/// Filters of the sub-merchant operation history
#[derive(Debug, Clone)]
pub struct OperationsQuery {
    pub currency_code: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub offset: Option<u32>,
    /// e.g. `PAYMENT_RECEIVED`, `PAYOUT`, `REFUND_SENT`
    pub kind: Option<String>,
    pub limit: Option<u32>,
    /// Field name prefixed with `+` or `-`
    pub sort_by: Option<String>,
}

impl OperationsQuery {
    /// Query string pairs; unset filters are left out
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("currencyCode", self.currency_code.clone()),
            (
                "eventDateFrom",
                self.date_from.to_rfc3339_opts(SecondsFormat::Secs, false),
            ),
            (
                "eventDateTo",
                self.date_to.to_rfc3339_opts(SecondsFormat::Secs, false),
            ),
        ];
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(kind) = &self.kind {
            params.push(("type", kind.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            params.push(("sortBy", sort_by.clone()));
        }
        params
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotification {
    pub order: Order,
    #[serde(default)]
    pub local_receipt_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundNotification {
    pub order_id: String,
    #[serde(default)]
    pub ext_order_id: Option<String>,
    pub refund: Refund,
}

/// Body of a payment notification sent to `notifyUrl`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    Order(OrderNotification),
    Refund(RefundNotification),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutNotification {
    pub payout: PayoutInfo,
}

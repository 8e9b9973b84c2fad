//! Dummy payment backend
//!
//! Talks to no gateway at all. The "paywall" is just a URL, callbacks carry a
//! tiny JSON body, and `fetch_status` answers whatever was fed in through
//! [`DummyBackend::simulate`]. Useful for local development and tests.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::lifecycle::{PaymentEvent, PayoutEvent};
use crate::payments::traits::PaymentBackend;
use crate::payments::types::{
    CallbackAck, CallbackOutcome, CallbackRequest, ChargeResult, CheckoutContext,
    CheckoutResult, CheckoutTarget, Payment, Payout, PayoutCallbackOutcome, PayoutResult,
    RefundResult,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-dummy-signature";

/// Dummy backend configuration
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Page the buyer is redirected to
    pub paywall_url: String,
    /// When set, callbacks must carry a hex HMAC-SHA256 of the body
    pub secret: Option<String>,
    /// Make every gateway operation fail
    pub fail_operations: bool,
    pub paid_tolerance: Decimal,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            paywall_url: "http://localhost:8000/dummy/paywall".to_string(),
            secret: None,
            fail_operations: false,
            paid_tolerance: Decimal::ZERO,
        }
    }
}

impl DummyConfig {
    /// Create config from environment variables, all of which are optional
    pub fn from_env() -> PaymentResult<Self> {
        let defaults = Self::default();

        let paywall_url =
            std::env::var("DUMMY_PAYWALL_URL").unwrap_or(defaults.paywall_url);
        let secret = std::env::var("DUMMY_SECRET").ok().filter(|s| !s.is_empty());
        let fail_operations = std::env::var("DUMMY_FAIL_OPERATIONS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let paid_tolerance = match std::env::var("DUMMY_PAID_TOLERANCE") {
            Ok(v) => v.parse().map_err(|_| {
                PaymentError::configuration(format!("DUMMY_PAID_TOLERANCE is not a decimal: {}", v))
            })?,
            Err(_) => Decimal::ZERO,
        };

        Ok(Self {
            paywall_url,
            secret,
            fail_operations,
            paid_tolerance,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DummyStatus {
    Prepared,
    Locked,
    InProgress,
    Paid,
    Failed,
    Cancelled,
    RefundCancelled,
    Refunded,
}

#[derive(Debug, Deserialize)]
struct DummyCallback {
    status: DummyStatus,
    #[serde(default)]
    amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DummyPayoutStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Deserialize)]
struct DummyPayoutCallback {
    status: DummyPayoutStatus,
    #[serde(default)]
    reason: Option<String>,
}

pub struct DummyBackend {
    config: DummyConfig,
    fail_operations: AtomicBool,
    simulated: RwLock<HashMap<Uuid, PaymentEvent>>,
    refund_calls: AtomicUsize,
}

impl DummyBackend {
    pub fn new(config: DummyConfig) -> Self {
        let fail_operations = AtomicBool::new(config.fail_operations);
        Self {
            config,
            fail_operations,
            simulated: RwLock::new(HashMap::new()),
            refund_calls: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Status `fetch_status` will report for `payment_id`
    pub fn simulate(&self, payment_id: Uuid, event: PaymentEvent) {
        if let Ok(mut simulated) = self.simulated.write() {
            simulated.insert(payment_id, event);
        }
    }

    pub fn set_fail_operations(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    /// Number of refunds the backend accepted
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Signature a callback with `body` must carry, if a secret is configured
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.config.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn failing(&self) -> bool {
        self.fail_operations.load(Ordering::SeqCst)
    }

    fn verify(&self, request: &CallbackRequest) -> PaymentResult<()> {
        let secret = match &self.config.secret {
            Some(secret) => secret,
            None => return Ok(()),
        };

        let provided = request
            .header(SIGNATURE_HEADER)
            .and_then(|s| hex::decode(s.trim()).ok())
            .ok_or_else(|| PaymentError::credentials("Missing or malformed callback signature", None))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PaymentError::configuration(format!("Invalid dummy secret: {}", e)))?;
        mac.update(&request.body);
        mac.verify_slice(&provided).map_err(|_| {
            warn!("Dummy callback signature mismatch");
            PaymentError::credentials("Invalid callback signature", None)
        })
    }
}

#[async_trait]
impl PaymentBackend for DummyBackend {
    fn slug(&self) -> &'static str {
        "dummy"
    }

    fn display_name(&self) -> &'static str {
        "Dummy"
    }

    fn accepted_currencies(&self) -> &[&'static str] {
        &["PLN", "EUR", "USD", "GBP"]
    }

    async fn build_checkout_request(
        &self,
        payment: &Payment,
        _context: &CheckoutContext,
    ) -> PaymentResult<CheckoutResult> {
        if self.failing() {
            return Err(PaymentError::lock_failure("Dummy gateway refused the order", None));
        }

        info!("Dummy checkout: payment={}", payment.id);
        Ok(CheckoutResult {
            target: CheckoutTarget::Redirect {
                url: format!(
                    "{}?payment={}&amount={}&currency={}",
                    self.config.paywall_url, payment.id, payment.amount_required, payment.currency
                ),
            },
            external_id: Some(format!("dummy-{}", payment.id)),
        })
    }

    async fn handle_callback(
        &self,
        request: &CallbackRequest,
        payment: &Payment,
    ) -> PaymentResult<CallbackOutcome> {
        self.verify(request)?;

        let callback: DummyCallback = serde_json::from_slice(&request.body).map_err(|e| {
            PaymentError::invalid_request(format!("Malformed dummy callback: {}", e))
        })?;

        let event = match callback.status {
            DummyStatus::Prepared => PaymentEvent::Prepared,
            DummyStatus::Locked => PaymentEvent::Locked {
                amount: callback.amount.unwrap_or(payment.amount_required),
            },
            DummyStatus::InProgress => PaymentEvent::ChargeStarted,
            DummyStatus::Paid => PaymentEvent::Paid {
                amount: callback.amount.unwrap_or(payment.amount_required),
            },
            DummyStatus::Failed => PaymentEvent::Failed,
            DummyStatus::Cancelled => PaymentEvent::Cancelled,
            DummyStatus::RefundCancelled => PaymentEvent::RefundCancelled,
            DummyStatus::Refunded => PaymentEvent::Refunded {
                amount: callback
                    .amount
                    .or(payment.pending_refund)
                    .unwrap_or_else(|| payment.refundable_amount()),
            },
        };

        Ok(CallbackOutcome {
            event: Some(event),
            ack: CallbackAck::ok(),
        })
    }

    async fn fetch_status(&self, payment: &Payment) -> PaymentResult<Option<PaymentEvent>> {
        let simulated = self
            .simulated
            .read()
            .map_err(|_| PaymentError::communication("Dummy status table poisoned", None))?;
        Ok(simulated.get(&payment.id).cloned())
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> PaymentResult<RefundResult> {
        if self.failing() {
            return Err(PaymentError::refund_failure("Dummy gateway refused the refund", None));
        }

        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        info!("Dummy refund: payment={}, amount={}", payment.id, amount);
        Ok(RefundResult {
            refund_id: format!("dummy-refund-{}", Uuid::new_v4()),
            completed: true,
        })
    }

    async fn charge(&self, payment: &Payment, amount: Decimal) -> PaymentResult<ChargeResult> {
        if self.failing() {
            return Err(PaymentError::charge_failure("Dummy gateway refused the charge", None));
        }

        info!("Dummy charge: payment={}, amount={}", payment.id, amount);
        Ok(ChargeResult {
            amount,
            completed: true,
        })
    }

    async fn release_lock(&self, payment: &Payment) -> PaymentResult<()> {
        if self.failing() {
            return Err(PaymentError::lock_failure("Dummy gateway kept the lock", None));
        }
        info!("Dummy lock released: payment={}", payment.id);
        Ok(())
    }

    async fn payout(&self, payout: &Payout) -> PaymentResult<PayoutResult> {
        if self.failing() {
            return Err(PaymentError::payout_failure("Dummy gateway refused the payout", None));
        }

        Ok(PayoutResult {
            external_id: format!("dummy-payout-{}", payout.id),
            event: PayoutEvent::Succeeded,
        })
    }

    async fn handle_payout_callback(
        &self,
        request: &CallbackRequest,
        payout: &Payout,
    ) -> PaymentResult<PayoutCallbackOutcome> {
        self.verify(request)?;

        let callback: DummyPayoutCallback = serde_json::from_slice(&request.body).map_err(|e| {
            PaymentError::invalid_request(format!("Malformed dummy payout callback: {}", e))
        })?;

        let event = match callback.status {
            DummyPayoutStatus::Pending => payout
                .external_id
                .clone()
                .map(|external_id| PayoutEvent::Submitted { external_id }),
            DummyPayoutStatus::Success => Some(PayoutEvent::Succeeded),
            DummyPayoutStatus::Failed => Some(PayoutEvent::Failed {
                reason: callback.reason,
            }),
        };

        Ok(PayoutCallbackOutcome {
            event,
            ack: CallbackAck::ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::NewPayment;
    use http::{HeaderMap, HeaderValue};
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(NewPayment {
            order_id: "order-3".to_string(),
            backend: "dummy".to_string(),
            description: "Order 3".to_string(),
            currency: "EUR".to_string(),
            amount: dec!(30.00),
        })
    }

    fn signed_backend() -> DummyBackend {
        DummyBackend::new(DummyConfig {
            secret: Some("s3cr3t".to_string()),
            ..DummyConfig::default()
        })
    }

    #[tokio::test]
    async fn test_paid_callback_defaults_to_required_amount() {
        let backend = DummyBackend::new(DummyConfig::default());
        let request = CallbackRequest::new(HeaderMap::new(), br#"{"status":"paid"}"#.to_vec());
        let outcome = backend.handle_callback(&request, &payment()).await.unwrap();
        assert_eq!(
            outcome.event,
            Some(PaymentEvent::Paid {
                amount: dec!(30.00)
            })
        );
        assert_eq!(outcome.ack, CallbackAck::ok());
    }

    #[tokio::test]
    async fn test_malformed_callback() {
        let backend = DummyBackend::new(DummyConfig::default());
        let request = CallbackRequest::new(HeaderMap::new(), b"not json".to_vec());
        assert!(matches!(
            backend.handle_callback(&request, &payment()).await,
            Err(PaymentError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_signed_callback() {
        let backend = signed_backend();
        let body = br#"{"status":"failed"}"#.to_vec();

        let mut headers = HeaderMap::new();
        let signature = backend.sign(&body).unwrap();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        let outcome = backend
            .handle_callback(&CallbackRequest::new(headers, body.clone()), &payment())
            .await
            .unwrap();
        assert_eq!(outcome.event, Some(PaymentEvent::Failed));

        let unsigned = CallbackRequest::new(HeaderMap::new(), body.clone());
        assert!(matches!(
            backend.handle_callback(&unsigned, &payment()).await,
            Err(PaymentError::Credentials { .. })
        ));

        let mut forged = HeaderMap::new();
        forged.insert(SIGNATURE_HEADER, HeaderValue::from_static("00ff"));
        assert!(matches!(
            backend
                .handle_callback(&CallbackRequest::new(forged, body), &payment())
                .await,
            Err(PaymentError::Credentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_simulated_status() {
        let backend = DummyBackend::new(DummyConfig::default());
        let p = payment();
        assert_eq!(backend.fetch_status(&p).await.unwrap(), None);

        backend.simulate(p.id, PaymentEvent::Failed);
        assert_eq!(
            backend.fetch_status(&p).await.unwrap(),
            Some(PaymentEvent::Failed)
        );
    }

    #[test]
    fn test_dummy_config_default() {
        let config = DummyConfig::default();
        assert!(config.secret.is_none());
        assert!(!config.fail_operations);
        assert_eq!(config.paid_tolerance, Decimal::ZERO);
    }
}

//! Payment backend trait definitions
//!
//! Defines the common interface that all payment backends must implement.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::lifecycle::PaymentEvent;
use crate::payments::types::{
    CallbackOutcome, CallbackRequest, ChargeResult, CheckoutContext, CheckoutResult, Payment,
    Payout, PayoutCallbackOutcome, PayoutResult, RefundResult,
};

/// Trait for payment backend implementations
///
/// A backend adapts one gateway to the application. It never changes a
/// record itself: it talks to the gateway and translates what the gateway
/// says into lifecycle events, which the processor then applies.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Identifier stored on every record this backend owns
    fn slug(&self) -> &'static str;

    /// Human readable name
    fn display_name(&self) -> &'static str;

    /// ISO-4217 codes the gateway accepts
    fn accepted_currencies(&self) -> &[&'static str];

    /// Register the payment with the gateway and tell where to send the buyer
    ///
    /// # Arguments
    /// * `payment` - Payment in status `new`
    /// * `context` - Buyer details, return and notification URLs
    async fn build_checkout_request(
        &self,
        payment: &Payment,
        context: &CheckoutContext,
    ) -> PaymentResult<CheckoutResult>;

    /// Interpret an inbound callback for `payment`
    ///
    /// Gateway-specific signature verification happens here.
    async fn handle_callback(
        &self,
        request: &CallbackRequest,
        payment: &Payment,
    ) -> PaymentResult<CallbackOutcome>;

    /// Ask the gateway for the current state of `payment`
    ///
    /// # Returns
    /// * `None` if the gateway reports nothing the lifecycle can act on
    async fn fetch_status(&self, payment: &Payment) -> PaymentResult<Option<PaymentEvent>>;

    /// Request a refund of `amount`
    async fn refund(&self, payment: &Payment, amount: Decimal) -> PaymentResult<RefundResult>;

    /// Capture a previously locked amount
    async fn charge(&self, payment: &Payment, _amount: Decimal) -> PaymentResult<ChargeResult> {
        Err(PaymentError::unsupported(self.slug(), &format!("charge of {}", payment.id)))
    }

    /// Cancel the gateway order, releasing any lock
    async fn release_lock(&self, payment: &Payment) -> PaymentResult<()> {
        Err(PaymentError::unsupported(
            self.slug(),
            &format!("releasing the lock of {}", payment.id),
        ))
    }

    /// Disburse money to a payee
    async fn payout(&self, payout: &Payout) -> PaymentResult<PayoutResult> {
        Err(PaymentError::unsupported(self.slug(), &format!("payout {}", payout.id)))
    }

    /// Interpret an inbound callback for `payout`
    async fn handle_payout_callback(
        &self,
        _request: &CallbackRequest,
        payout: &Payout,
    ) -> PaymentResult<PayoutCallbackOutcome> {
        Err(PaymentError::unsupported(
            self.slug(),
            &format!("callbacks for payout {}", payout.id),
        ))
    }
}

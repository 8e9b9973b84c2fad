//! Payment orchestration
//!
//! Glues the registry, the lifecycle and the store together. Every record
//! change is a compare-and-set on `version`; when another request wins the
//! race the record is reloaded and the event applied again, which resolves
//! concurrent duplicate deliveries to a single transition.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::lifecycle::{self, PaymentEvent, PayoutEvent, Transition};
use crate::payments::registry::BackendRegistry;
use crate::payments::store::PaymentStore;
use crate::payments::types::{
    CallbackAck, CallbackRequest, CheckoutContext, CheckoutTarget, NewPayment, NewPayout,
    Payment, PaymentStatus, Payout, PayoutStatus,
};

const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// What happened to the record while handling a callback
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition<S> {
    Changed { from: S, to: S },
    /// Already recorded, e.g. a redelivered notification
    Duplicate(S),
    /// The notification carried nothing the lifecycle acts on
    NoEvent,
    /// The lifecycle refused the event; the record is unchanged
    Rejected { reason: String },
}

impl<S: Copy> From<Transition<S>> for Disposition<S> {
    fn from(transition: Transition<S>) -> Self {
        match transition {
            Transition::Applied { from, to } => Disposition::Changed { from, to },
            Transition::Duplicate(status) => Disposition::Duplicate(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReport<S> {
    /// Response the gateway expects
    pub ack: CallbackAck,
    pub disposition: Disposition<S>,
}

pub struct PaymentProcessor {
    registry: Arc<BackendRegistry>,
    store: Arc<dyn PaymentStore>,
    /// Public base URL gateways use to reach the callback endpoint
    callback_base_url: String,
}

impl PaymentProcessor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        store: Arc<dyn PaymentStore>,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            callback_base_url: callback_base_url.into(),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn payment_callback_url(&self, id: Uuid) -> String {
        format!(
            "{}/payments/callback/{}/",
            self.callback_base_url.trim_end_matches('/'),
            id
        )
    }

    pub fn payout_callback_url(&self, id: Uuid) -> String {
        format!(
            "{}/payouts/callback/{}/",
            self.callback_base_url.trim_end_matches('/'),
            id
        )
    }

    pub async fn get_payment(&self, id: Uuid) -> PaymentResult<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Payment", id))
    }

    pub async fn get_payout(&self, id: Uuid) -> PaymentResult<Payout> {
        self.store
            .get_payout(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Payout", id))
    }

    /// Register a new payment in status `new`
    pub async fn create_payment(&self, input: NewPayment) -> PaymentResult<Payment> {
        let backend = self.registry.get(&input.backend)?;

        if input.amount <= Decimal::ZERO {
            return Err(PaymentError::invalid_request(format!(
                "Payment amount must be positive, got {}",
                input.amount
            )));
        }

        let currency = input.currency.to_uppercase();
        if !backend.accepted_currencies().contains(&currency.as_str()) {
            return Err(PaymentError::invalid_request(format!(
                "Backend '{}' does not accept currency {}",
                backend.slug(),
                currency
            )));
        }

        let payment = Payment::new(input);
        self.store.insert_payment(&payment).await?;

        info!(
            "Payment created: id={}, order_id={}, backend={}, amount={} {}",
            payment.id, payment.order_id, payment.backend, payment.amount_required, payment.currency
        );
        Ok(payment)
    }

    /// Register the payment with its gateway and return where the buyer goes next
    pub async fn begin_checkout(
        &self,
        id: Uuid,
        mut context: CheckoutContext,
    ) -> PaymentResult<CheckoutTarget> {
        let payment = self.get_payment(id).await?;
        if payment.status != PaymentStatus::New {
            return Err(PaymentError::transition_rejected(
                payment.status,
                PaymentEvent::Prepared,
            ));
        }

        let backend = self.registry.get(&payment.backend)?;
        if context.notify_url.is_none() {
            context.notify_url = Some(self.payment_callback_url(id));
        }

        info!(
            "Starting checkout: payment={}, backend={}, amount={} {}",
            id, payment.backend, payment.amount_required, payment.currency
        );

        let result = backend
            .build_checkout_request(&payment, &context)
            .await
            .map_err(|e| {
                error!("Checkout failed for payment {}: {}", id, e);
                e
            })?;

        let external_id = result.external_id.clone();
        self.update_payment_with(id, |p| {
            let policy = self.registry.policy(&p.backend)?;
            if let Some(external_id) = &external_id {
                p.external_id = Some(external_id.clone());
            }
            lifecycle::apply_event(p, &PaymentEvent::Prepared, &policy, Utc::now())
        })
        .await?;

        Ok(result.target)
    }

    /// Delegate an inbound callback to the owning backend and apply its verdict
    pub async fn handle_callback(
        &self,
        id: Uuid,
        request: &CallbackRequest,
    ) -> PaymentResult<CallbackReport<PaymentStatus>> {
        let payment = self.get_payment(id).await?;
        let backend = self.registry.get(&payment.backend)?;

        let outcome = backend.handle_callback(request, &payment).await?;
        let disposition = match &outcome.event {
            None => Disposition::NoEvent,
            Some(event) => match self.apply_payment_event(id, event).await {
                Ok((_, transition)) => transition.into(),
                Err(e @ PaymentError::TransitionRejected { .. }) => {
                    warn!("Ignoring callback for payment {}: {}", id, e);
                    Disposition::Rejected {
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            },
        };

        debug!("Payment callback handled: id={}, disposition={:?}", id, disposition);
        Ok(CallbackReport {
            ack: outcome.ack,
            disposition,
        })
    }

    /// Poll the gateway and apply whatever it reports
    pub async fn refresh_status(&self, id: Uuid) -> PaymentResult<Payment> {
        let payment = self.get_payment(id).await?;
        let backend = self.registry.get(&payment.backend)?;

        let event = match backend.fetch_status(&payment).await? {
            Some(event) => event,
            None => return Ok(payment),
        };

        match self.apply_payment_event(id, &event).await {
            Ok((payment, _)) => Ok(payment),
            Err(e @ PaymentError::TransitionRejected { .. }) => {
                // The gateway view lags behind ours
                warn!("Gateway status for payment {} not applied: {}", id, e);
                self.get_payment(id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Capture a locked payment; `None` captures the whole locked amount.
    ///
    /// The payment is moved to `in_progress` before the gateway is called, so
    /// only one of several concurrent requests ever reaches the gateway.
    pub async fn charge(&self, id: Uuid, amount: Option<Decimal>) -> PaymentResult<Payment> {
        let mut charged = Decimal::ZERO;
        let (payment, _) = self
            .update_payment_with(id, |p| {
                if p.status != PaymentStatus::Locked {
                    return Err(PaymentError::transition_rejected(
                        p.status,
                        PaymentEvent::ChargeStarted,
                    ));
                }
                charged = amount.unwrap_or(p.amount_locked);
                if charged <= Decimal::ZERO || charged > p.amount_locked {
                    return Err(PaymentError::invalid_request(format!(
                        "Cannot charge {}, locked amount is {}",
                        charged, p.amount_locked
                    )));
                }
                let policy = self.registry.policy(&p.backend)?;
                lifecycle::apply_event(p, &PaymentEvent::ChargeStarted, &policy, Utc::now())
            })
            .await?;
        let amount = charged;

        let backend = self.registry.get(&payment.backend)?;
        let result = match backend.charge(&payment, amount).await {
            Ok(result) => result,
            Err(e) => {
                error!("Charge of payment {} failed: {}", id, e);
                self.release_charge(&payment).await;
                return Err(e);
            }
        };
        info!(
            "Charge accepted: payment={}, amount={}, completed={}",
            id, result.amount, result.completed
        );

        if !result.completed {
            return Ok(payment);
        }
        let paid = PaymentEvent::Paid {
            amount: result.amount,
        };
        match self.apply_payment_event(id, &paid).await {
            Ok((payment, _)) => Ok(payment),
            Err(e @ PaymentError::TransitionRejected { .. }) => {
                // A notification already moved the payment past the capture
                warn!("Capture result for payment {} not applied: {}", id, e);
                self.get_payment(id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Put a reserved charge back to `locked` after the capture did not happen
    async fn release_charge(&self, payment: &Payment) {
        let relock = PaymentEvent::Locked {
            amount: payment.amount_locked,
        };
        if let Err(e) = self.apply_payment_event(payment.id, &relock).await {
            warn!("Payment {} left as is after a failed charge: {}", payment.id, e);
        }
    }

    /// Cancel a payment that has not been paid, releasing any gateway lock
    pub async fn cancel(&self, id: Uuid) -> PaymentResult<Payment> {
        let payment = self.get_payment(id).await?;
        let policy = self.registry.policy(&payment.backend)?;
        if let Transition::Duplicate(_) =
            lifecycle::check_event(&payment, &PaymentEvent::Cancelled, &policy)?
        {
            return Ok(payment);
        }

        if payment.external_id.is_some() {
            let backend = self.registry.get(&payment.backend)?;
            backend.release_lock(&payment).await?;
        }

        Ok(self.apply_payment_event(id, &PaymentEvent::Cancelled).await?.0)
    }

    /// Refund `amount` (everything refundable when `None`).
    ///
    /// The refund is recorded as started before the gateway is called, so a
    /// second request for the same payment is rejected instead of producing a
    /// second refund call.
    pub async fn refund(&self, id: Uuid, amount: Option<Decimal>) -> PaymentResult<Payment> {
        let payment = self.get_payment(id).await?;
        let amount = amount.unwrap_or_else(|| payment.refundable_amount());
        let started = PaymentEvent::RefundStarted { amount };

        let (payment, transition) = self.apply_payment_event(id, &started).await?;
        if let Transition::Duplicate(status) = transition {
            return Err(PaymentError::transition_rejected(status, &started));
        }

        let backend = self.registry.get(&payment.backend)?;
        let result = match backend.refund(&payment, amount).await {
            Ok(result) => result,
            Err(e) => {
                error!("Refund of payment {} failed: {}", id, e);
                self.apply_payment_event(id, &PaymentEvent::RefundCancelled)
                    .await?;
                return Err(e);
            }
        };

        info!(
            "Refund requested: payment={}, refund_id={}, amount={}, completed={}",
            id, result.refund_id, amount, result.completed
        );

        if result.completed {
            return Ok(self
                .apply_payment_event(id, &PaymentEvent::Refunded { amount })
                .await?
                .0);
        }
        Ok(payment)
    }

    /// Register a new payout in status `new`
    pub async fn create_payout(&self, input: NewPayout) -> PaymentResult<Payout> {
        self.registry.get(&input.backend)?;

        if let Some(amount) = input.amount {
            if amount <= Decimal::ZERO {
                return Err(PaymentError::invalid_request(format!(
                    "Payout amount must be positive, got {}",
                    amount
                )));
            }
        }

        let payout = Payout::new(input);
        self.store.insert_payout(&payout).await?;
        info!(
            "Payout created: id={}, backend={}, shop_id={}",
            payout.id, payout.backend, payout.shop_id
        );
        Ok(payout)
    }

    /// Send a payout to its gateway.
    ///
    /// The payout is claimed (`new` to `pending`) before the gateway is
    /// called; a concurrent second execution loses the claim and never reaches
    /// the gateway.
    pub async fn execute_payout(&self, id: Uuid) -> PaymentResult<Payout> {
        let payout = self.get_payout(id).await?;
        let backend = self.registry.get(&payout.backend)?;

        let (payout, _) = self.apply_payout_event(id, &PayoutEvent::Started).await?;

        let result = match backend.payout(&payout).await {
            Ok(result) => result,
            Err(e @ PaymentError::PayoutFailure { .. }) => {
                error!("Payout {} rejected: {}", id, e);
                let reason = e
                    .raw_response()
                    .map(|raw| raw.body.clone())
                    .unwrap_or_else(|| e.to_string());
                self.apply_payout_event(
                    id,
                    &PayoutEvent::Failed {
                        reason: Some(reason),
                    },
                )
                .await?;
                return Err(e);
            }
            Err(e) => {
                error!("Payout {} not sent: {}", id, e);
                if let Err(release) = self.apply_payout_event(id, &PayoutEvent::Released).await {
                    warn!("Payout {} left pending: {}", id, release);
                }
                return Err(e);
            }
        };

        let submitted = PayoutEvent::Submitted {
            external_id: result.external_id.clone(),
        };
        let mut payout = match self.apply_payout_event(id, &submitted).await {
            Ok((payout, _)) => payout,
            Err(e @ PaymentError::TransitionRejected { .. }) => {
                // A notification settled the payout first
                warn!("Submission of payout {} not recorded: {}", id, e);
                return self.get_payout(id).await;
            }
            Err(e) => return Err(e),
        };
        if !matches!(result.event, PayoutEvent::Submitted { .. }) {
            payout = self.apply_payout_event(id, &result.event).await?.0;
        }

        info!(
            "Payout executed: id={}, external_id={}, status={}",
            id, result.external_id, payout.status
        );
        Ok(payout)
    }

    pub async fn handle_payout_callback(
        &self,
        id: Uuid,
        request: &CallbackRequest,
    ) -> PaymentResult<CallbackReport<PayoutStatus>> {
        let payout = self.get_payout(id).await?;
        let backend = self.registry.get(&payout.backend)?;

        let outcome = backend.handle_payout_callback(request, &payout).await?;
        let disposition = match &outcome.event {
            None => Disposition::NoEvent,
            Some(event) => match self.apply_payout_event(id, event).await {
                Ok((_, transition)) => transition.into(),
                Err(e @ PaymentError::TransitionRejected { .. }) => {
                    warn!("Ignoring callback for payout {}: {}", id, e);
                    Disposition::Rejected {
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            },
        };

        Ok(CallbackReport {
            ack: outcome.ack,
            disposition,
        })
    }

    /// Apply `event` to the stored payment
    pub async fn apply_payment_event(
        &self,
        id: Uuid,
        event: &PaymentEvent,
    ) -> PaymentResult<(Payment, Transition<PaymentStatus>)> {
        self.update_payment_with(id, |p| {
            let policy = self.registry.policy(&p.backend)?;
            lifecycle::apply_event(p, event, &policy, Utc::now())
        })
        .await
    }

    /// Apply `event` to the stored payout
    pub async fn apply_payout_event(
        &self,
        id: Uuid,
        event: &PayoutEvent,
    ) -> PaymentResult<(Payout, Transition<PayoutStatus>)> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut payout = self.get_payout(id).await?;
            let expected = payout.version;

            let transition = lifecycle::apply_payout_event(&mut payout, event, Utc::now())?;
            let (from, to) = match transition {
                Transition::Duplicate(_) => return Ok((payout, transition)),
                Transition::Applied { from, to } => (from, to),
            };

            payout.version = expected + 1;
            if self.store.update_payout(&payout, expected).await? {
                info!("Payout {} moved from {} to {}", id, from, to);
                return Ok((payout, transition));
            }
            warn!(
                "Concurrent update of payout {} detected (attempt {}), reloading",
                id, attempt
            );
        }

        Err(PaymentError::storage(
            format!("Payout {} kept changing concurrently", id),
            true,
        ))
    }

    async fn update_payment_with<F>(
        &self,
        id: Uuid,
        mut mutate: F,
    ) -> PaymentResult<(Payment, Transition<PaymentStatus>)>
    where
        F: FnMut(&mut Payment) -> PaymentResult<Transition<PaymentStatus>> + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut payment = self.get_payment(id).await?;
            let expected = payment.version;

            let transition = mutate(&mut payment)?;
            let (from, to) = match transition {
                Transition::Duplicate(status) => {
                    debug!("Payment {} already in {}, nothing to update", id, status);
                    return Ok((payment, transition));
                }
                Transition::Applied { from, to } => (from, to),
            };

            payment.version = expected + 1;
            if self.store.update_payment(&payment, expected).await? {
                info!("Payment {} moved from {} to {}", id, from, to);
                return Ok((payment, transition));
            }
            warn!(
                "Concurrent update of payment {} detected (attempt {}), reloading",
                id, attempt
            );
        }

        Err(PaymentError::storage(
            format!("Payment {} kept changing concurrently", id),
            true,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::lifecycle::LifecyclePolicy;
    use crate::payments::providers::dummy::{DummyBackend, DummyConfig};
    use crate::payments::store::InMemoryStore;
    use http::HeaderMap;
    use rust_decimal_macros::dec;

    struct Fixture {
        processor: PaymentProcessor,
        dummy: Arc<DummyBackend>,
        store: Arc<InMemoryStore>,
    }

    fn fixture_with(config: DummyConfig) -> Fixture {
        let dummy = Arc::new(DummyBackend::new(config));
        let registry = BackendRegistry::new().with(dummy.clone(), LifecyclePolicy::default());
        let store = Arc::new(InMemoryStore::new());
        let processor =
            PaymentProcessor::new(Arc::new(registry), store.clone(), "https://shop.example.com/");
        Fixture {
            processor,
            dummy,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(DummyConfig::default())
    }

    fn new_payment(amount: Decimal) -> NewPayment {
        NewPayment {
            order_id: "order-42".to_string(),
            backend: "dummy".to_string(),
            description: "Order 42".to_string(),
            currency: "PLN".to_string(),
            amount,
        }
    }

    fn callback(body: &str) -> CallbackRequest {
        CallbackRequest::new(HeaderMap::new(), body.as_bytes().to_vec())
    }

    async fn paid_payment(f: &Fixture) -> Payment {
        let payment = f.processor.create_payment(new_payment(dec!(100.00))).await.unwrap();
        f.processor
            .begin_checkout(payment.id, CheckoutContext::default())
            .await
            .unwrap();
        f.processor
            .handle_callback(payment.id, &callback(r#"{"status":"paid","amount":"100.00"}"#))
            .await
            .unwrap();
        f.processor.get_payment(payment.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_payment_validates_input() {
        let f = fixture();
        let mut bad_backend = new_payment(dec!(1));
        bad_backend.backend = "stripe".to_string();
        assert!(matches!(
            f.processor.create_payment(bad_backend).await,
            Err(PaymentError::UnknownBackend { .. })
        ));

        assert!(matches!(
            f.processor.create_payment(new_payment(dec!(0))).await,
            Err(PaymentError::InvalidRequest { .. })
        ));

        let mut bad_currency = new_payment(dec!(1));
        bad_currency.currency = "XYZ".to_string();
        assert!(matches!(
            f.processor.create_payment(bad_currency).await,
            Err(PaymentError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkout_prepares_payment() {
        let f = fixture();
        let payment = f.processor.create_payment(new_payment(dec!(10))).await.unwrap();

        let target = f
            .processor
            .begin_checkout(payment.id, CheckoutContext::default())
            .await
            .unwrap();
        assert!(matches!(target, CheckoutTarget::Redirect { .. }));

        let stored = f.processor.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Prepared);
        assert_eq!(stored.version, 1);
        assert_eq!(
            stored.external_id,
            Some(format!("dummy-{}", payment.id))
        );

        // A second checkout would register a second gateway order
        assert!(matches!(
            f.processor
                .begin_checkout(payment.id, CheckoutContext::default())
                .await,
            Err(PaymentError::TransitionRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkout_failure_leaves_payment_new() {
        let f = fixture_with(DummyConfig {
            fail_operations: true,
            ..DummyConfig::default()
        });
        let payment = f.processor.create_payment(new_payment(dec!(10))).await.unwrap();
        let err = f
            .processor
            .begin_checkout(payment.id, CheckoutContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::LockFailure { .. }));
        assert_eq!(
            f.processor.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::New
        );
    }

    #[tokio::test]
    async fn test_callback_is_idempotent() {
        let f = fixture();
        let payment = paid_payment(&f).await;
        assert_eq!(payment.status, PaymentStatus::Paid);

        let report = f
            .processor
            .handle_callback(payment.id, &callback(r#"{"status":"paid","amount":"100.00"}"#))
            .await
            .unwrap();
        assert_eq!(report.disposition, Disposition::Duplicate(PaymentStatus::Paid));
        assert_eq!(report.ack, CallbackAck::ok());

        let after = f.processor.get_payment(payment.id).await.unwrap();
        assert_eq!(after, payment);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_callbacks_apply_once() {
        let f = fixture();
        let payment = f.processor.create_payment(new_payment(dec!(100.00))).await.unwrap();
        let body = callback(r#"{"status":"paid","amount":"100.00"}"#);

        let (a, b) = tokio::join!(
            f.processor.handle_callback(payment.id, &body),
            f.processor.handle_callback(payment.id, &body)
        );
        let dispositions = [a.unwrap().disposition, b.unwrap().disposition];
        let changed = dispositions
            .iter()
            .filter(|d| matches!(d, Disposition::Changed { .. }))
            .count();
        assert_eq!(changed, 1);

        let stored = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Paid);
        assert_eq!(stored.amount_paid, dec!(100.00));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_stale_callback_is_acknowledged_but_ignored() {
        let f = fixture();
        let payment = paid_payment(&f).await;

        let report = f
            .processor
            .handle_callback(payment.id, &callback(r#"{"status":"failed"}"#))
            .await
            .unwrap();
        assert!(matches!(report.disposition, Disposition::Rejected { .. }));
        assert_eq!(report.ack, CallbackAck::ok());
        assert_eq!(
            f.processor.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_callback_for_unknown_payment() {
        let f = fixture();
        let err = f
            .processor
            .handle_callback(Uuid::new_v4(), &callback(r#"{"status":"paid"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_refresh_status_applies_gateway_state() {
        let f = fixture();
        let payment = f.processor.create_payment(new_payment(dec!(20))).await.unwrap();
        f.dummy
            .simulate(payment.id, PaymentEvent::Locked { amount: dec!(20) });

        let refreshed = f.processor.refresh_status(payment.id).await.unwrap();
        assert_eq!(refreshed.status, PaymentStatus::Locked);
        assert_eq!(refreshed.amount_locked, dec!(20));

        let charged = f.processor.charge(payment.id, None).await.unwrap();
        assert_eq!(charged.status, PaymentStatus::Paid);
        assert_eq!(charged.amount_paid, dec!(20));
    }

    #[tokio::test]
    async fn test_full_refund() {
        let f = fixture();
        let payment = paid_payment(&f).await;

        let refunded = f.processor.refund(payment.id, None).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(refunded.amount_refunded, dec!(100.00));
        assert_eq!(f.dummy.refund_calls(), 1);
    }

    #[tokio::test]
    async fn test_refund_of_refunded_payment_is_rejected_without_gateway_call() {
        let f = fixture();
        let payment = paid_payment(&f).await;
        f.processor.refund(payment.id, None).await.unwrap();
        assert_eq!(f.dummy.refund_calls(), 1);

        let err = f
            .processor
            .refund(payment.id, Some(dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransitionRejected { .. }));
        assert_eq!(f.dummy.refund_calls(), 1);
        assert_eq!(
            f.processor.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_failed_refund_restores_paid() {
        let f = fixture();
        let payment = paid_payment(&f).await;
        f.dummy.set_fail_operations(true);

        let err = f.processor.refund(payment.id, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::RefundFailure { .. }));

        let stored = f.processor.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Paid);
        assert!(stored.pending_refund.is_none());
    }

    #[tokio::test]
    async fn test_cancel_prepared_payment() {
        let f = fixture();
        let payment = f.processor.create_payment(new_payment(dec!(5))).await.unwrap();
        f.processor
            .begin_checkout(payment.id, CheckoutContext::default())
            .await
            .unwrap();

        let cancelled = f.processor.cancel(payment.id).await.unwrap();
        assert_eq!(cancelled.status, PaymentStatus::Cancelled);
        assert!(f.processor.cancel(payment.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_payout_success() {
        let f = fixture();
        let payout = f
            .processor
            .create_payout(NewPayout {
                backend: "dummy".to_string(),
                shop_id: "shop-1".to_string(),
                customer_name: "Jan Kowalski".to_string(),
                description: "Settlement".to_string(),
                amount: Some(dec!(75)),
                ext_customer_id: Some("seller-1".to_string()),
                currency_code: "PLN".to_string(),
            })
            .await
            .unwrap();

        let executed = f.processor.execute_payout(payout.id).await.unwrap();
        assert_eq!(executed.status, PayoutStatus::Success);
        assert_eq!(
            executed.external_id,
            Some(format!("dummy-payout-{}", payout.id))
        );

        assert!(matches!(
            f.processor.execute_payout(payout.id).await,
            Err(PaymentError::TransitionRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_payout_failure_is_recorded() {
        let f = fixture_with(DummyConfig {
            fail_operations: true,
            ..DummyConfig::default()
        });
        let payout = f
            .processor
            .create_payout(NewPayout {
                backend: "dummy".to_string(),
                shop_id: "shop-1".to_string(),
                customer_name: String::new(),
                description: String::new(),
                amount: None,
                ext_customer_id: None,
                currency_code: "PLN".to_string(),
            })
            .await
            .unwrap();

        let err = f.processor.execute_payout(payout.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::PayoutFailure { .. }));

        let stored = f.processor.get_payout(payout.id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Failed);
        assert!(stored.failed_code.is_some());
    }

    #[test]
    fn test_callback_urls() {
        let f = fixture();
        let id = Uuid::nil();
        assert_eq!(
            f.processor.payment_callback_url(id),
            format!("https://shop.example.com/payments/callback/{}/", id)
        );
        assert_eq!(
            f.processor.payout_callback_url(id),
            format!("https://shop.example.com/payouts/callback/{}/", id)
        );
    }

    /// Gateway that takes a while to answer and counts the calls it gets
    #[derive(Default)]
    struct SlowBackend {
        charge_calls: std::sync::atomic::AtomicUsize,
        payout_calls: std::sync::atomic::AtomicUsize,
        unreachable: std::sync::atomic::AtomicBool,
    }

    impl SlowBackend {
        fn calls(counter: &std::sync::atomic::AtomicUsize) -> usize {
            counter.load(std::sync::atomic::Ordering::SeqCst)
        }

        async fn answer(&self, counter: &std::sync::atomic::AtomicUsize) -> PaymentResult<()> {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(PaymentError::communication("Gateway unreachable", None));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl crate::payments::traits::PaymentBackend for SlowBackend {
        fn slug(&self) -> &'static str {
            "slow"
        }

        fn display_name(&self) -> &'static str {
            "Slow gateway"
        }

        fn accepted_currencies(&self) -> &[&'static str] {
            &["PLN"]
        }

        async fn build_checkout_request(
            &self,
            payment: &Payment,
            _context: &CheckoutContext,
        ) -> PaymentResult<crate::payments::types::CheckoutResult> {
            Ok(crate::payments::types::CheckoutResult {
                target: CheckoutTarget::Redirect {
                    url: format!("https://slow.example.com/pay/{}", payment.id),
                },
                external_id: None,
            })
        }

        async fn handle_callback(
            &self,
            _request: &CallbackRequest,
            _payment: &Payment,
        ) -> PaymentResult<crate::payments::types::CallbackOutcome> {
            Ok(crate::payments::types::CallbackOutcome {
                event: None,
                ack: CallbackAck::ok(),
            })
        }

        async fn fetch_status(&self, _payment: &Payment) -> PaymentResult<Option<PaymentEvent>> {
            Ok(None)
        }

        async fn refund(
            &self,
            payment: &Payment,
            _amount: Decimal,
        ) -> PaymentResult<crate::payments::types::RefundResult> {
            Ok(crate::payments::types::RefundResult {
                refund_id: format!("slow-refund-{}", payment.id),
                completed: true,
            })
        }

        async fn charge(
            &self,
            _payment: &Payment,
            amount: Decimal,
        ) -> PaymentResult<crate::payments::types::ChargeResult> {
            self.answer(&self.charge_calls).await?;
            Ok(crate::payments::types::ChargeResult {
                amount,
                completed: true,
            })
        }

        async fn payout(
            &self,
            payout: &Payout,
        ) -> PaymentResult<crate::payments::types::PayoutResult> {
            self.answer(&self.payout_calls).await?;
            let external_id = format!("slow-payout-{}", payout.id);
            Ok(crate::payments::types::PayoutResult {
                external_id: external_id.clone(),
                event: PayoutEvent::Submitted { external_id },
            })
        }
    }

    fn slow_processor() -> (PaymentProcessor, Arc<SlowBackend>) {
        let backend = Arc::new(SlowBackend::default());
        let registry = BackendRegistry::new().with(backend.clone(), LifecyclePolicy::default());
        let processor = PaymentProcessor::new(
            Arc::new(registry),
            Arc::new(InMemoryStore::new()),
            "https://shop.example.com/",
        );
        (processor, backend)
    }

    async fn locked_payment(processor: &PaymentProcessor) -> Uuid {
        let mut input = new_payment(dec!(100.00));
        input.backend = "slow".to_string();
        let payment = processor.create_payment(input).await.unwrap();
        processor
            .apply_payment_event(payment.id, &PaymentEvent::Locked { amount: dec!(100.00) })
            .await
            .unwrap();
        payment.id
    }

    async fn slow_payout(processor: &PaymentProcessor) -> Uuid {
        processor
            .create_payout(NewPayout {
                backend: "slow".to_string(),
                shop_id: "shop-1".to_string(),
                customer_name: String::new(),
                description: String::new(),
                amount: Some(dec!(20)),
                ext_customer_id: None,
                currency_code: "PLN".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_concurrent_payout_executions_reach_gateway_once() {
        let (processor, backend) = slow_processor();
        let id = slow_payout(&processor).await;

        let (first, second) =
            tokio::join!(processor.execute_payout(id), processor.execute_payout(id));

        assert_eq!(SlowBackend::calls(&backend.payout_calls), 1);
        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(loser, Err(PaymentError::TransitionRejected { .. })));

        let stored = processor.get_payout(id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Pending);
        assert_eq!(stored.external_id, Some(format!("slow-payout-{}", id)));
    }

    #[tokio::test]
    async fn test_unsent_payout_is_released() {
        let (processor, backend) = slow_processor();
        let id = slow_payout(&processor).await;
        backend
            .unreachable
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = processor.execute_payout(id).await.unwrap_err();
        assert!(matches!(err, PaymentError::Communication { .. }));
        assert_eq!(processor.get_payout(id).await.unwrap().status, PayoutStatus::New);

        // Once the gateway is back the payout goes through
        backend
            .unreachable
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let executed = processor.execute_payout(id).await.unwrap();
        assert_eq!(executed.status, PayoutStatus::Pending);
        assert_eq!(SlowBackend::calls(&backend.payout_calls), 2);
    }

    #[tokio::test]
    async fn test_concurrent_charges_reach_gateway_once() {
        let (processor, backend) = slow_processor();
        let id = locked_payment(&processor).await;

        let (first, second) = tokio::join!(processor.charge(id, None), processor.charge(id, None));

        assert_eq!(SlowBackend::calls(&backend.charge_calls), 1);
        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let stored = processor.get_payment(id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Paid);
        assert_eq!(stored.amount_paid, dec!(100.00));
    }

    #[tokio::test]
    async fn test_failed_charge_restores_locked() {
        let (processor, backend) = slow_processor();
        let id = locked_payment(&processor).await;
        backend
            .unreachable
            .store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(processor.charge(id, None).await.is_err());

        let stored = processor.get_payment(id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Locked);
        assert_eq!(stored.amount_locked, dec!(100.00));
    }

    #[tokio::test]
    async fn test_paid_notification_during_capture() {
        let (processor, backend) = slow_processor();
        let id = locked_payment(&processor).await;

        let notify = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            processor
                .apply_payment_event(id, &PaymentEvent::Paid { amount: dec!(100.00) })
                .await
        };
        let (charged, notified) = tokio::join!(processor.charge(id, None), notify);

        notified.unwrap();
        let charged = charged.unwrap();
        assert_eq!(charged.status, PaymentStatus::Paid);
        assert_eq!(charged.amount_paid, dec!(100.00));
        assert_eq!(SlowBackend::calls(&backend.charge_calls), 1);
    }

    #[tokio::test]
    async fn test_charge_of_paid_payment_skips_gateway() {
        let (processor, backend) = slow_processor();
        let id = locked_payment(&processor).await;
        processor
            .apply_payment_event(id, &PaymentEvent::Paid { amount: dec!(100.00) })
            .await
            .unwrap();

        assert!(matches!(
            processor.charge(id, None).await,
            Err(PaymentError::TransitionRejected { .. })
        ));
        assert_eq!(SlowBackend::calls(&backend.charge_calls), 0);
    }
}

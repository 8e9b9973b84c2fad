use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{Payment, Payout};

/// Persistence port used by the processor.
///
/// Updates are compare-and-set on `version`: `update_*` writes the record only
/// if the stored version still equals `expected_version` and reports whether
/// it did.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get_payment(&self, id: Uuid) -> PaymentResult<Option<Payment>>;
    async fn insert_payment(&self, payment: &Payment) -> PaymentResult<()>;
    async fn update_payment(&self, payment: &Payment, expected_version: i64)
        -> PaymentResult<bool>;

    async fn get_payout(&self, id: Uuid) -> PaymentResult<Option<Payout>>;
    async fn insert_payout(&self, payout: &Payout) -> PaymentResult<()>;
    async fn update_payout(&self, payout: &Payout, expected_version: i64) -> PaymentResult<bool>;
}

/// A thread-safe in-memory store.
///
/// Used by tests and by the demo setup where nothing needs to survive a
/// restart.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
    payouts: Arc<RwLock<HashMap<Uuid, Payout>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get_payment(&self, id: Uuid) -> PaymentResult<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(&id).cloned())
    }

    async fn insert_payment(&self, payment: &Payment) -> PaymentResult<()> {
        let mut payments = self.payments.write().await;
        match payments.entry(payment.id) {
            Entry::Occupied(_) => Err(PaymentError::storage(
                format!("Payment {} already exists", payment.id),
                false,
            )),
            Entry::Vacant(slot) => {
                slot.insert(payment.clone());
                Ok(())
            }
        }
    }

    async fn update_payment(
        &self,
        payment: &Payment,
        expected_version: i64,
    ) -> PaymentResult<bool> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&payment.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = payment.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_payout(&self, id: Uuid) -> PaymentResult<Option<Payout>> {
        let payouts = self.payouts.read().await;
        Ok(payouts.get(&id).cloned())
    }

    async fn insert_payout(&self, payout: &Payout) -> PaymentResult<()> {
        let mut payouts = self.payouts.write().await;
        match payouts.entry(payout.id) {
            Entry::Occupied(_) => Err(PaymentError::storage(
                format!("Payout {} already exists", payout.id),
                false,
            )),
            Entry::Vacant(slot) => {
                slot.insert(payout.clone());
                Ok(())
            }
        }
    }

    async fn update_payout(&self, payout: &Payout, expected_version: i64) -> PaymentResult<bool> {
        let mut payouts = self.payouts.write().await;
        match payouts.get_mut(&payout.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = payout.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{NewPayment, NewPayout, PaymentStatus};
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(NewPayment {
            order_id: "order-7".to_string(),
            backend: "dummy".to_string(),
            description: "Order 7".to_string(),
            currency: "PLN".to_string(),
            amount: dec!(12.50),
        })
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryStore::new();
        let p = payment();
        store.insert_payment(&p).await.unwrap();
        assert_eq!(store.get_payment(p.id).await.unwrap(), Some(p));
        assert_eq!(store.get_payment(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = InMemoryStore::new();
        let mut p = payment();
        store.insert_payment(&p).await.unwrap();

        p.status = PaymentStatus::Prepared;
        p.version = 1;
        assert!(store.update_payment(&p, 0).await.unwrap());

        // A writer that loaded version 0 loses
        let mut stale = p.clone();
        stale.status = PaymentStatus::Failed;
        stale.version = 1;
        assert!(!store.update_payment(&stale, 0).await.unwrap());

        let stored = store.get_payment(p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Prepared);
    }

    #[tokio::test]
    async fn test_insert_does_not_overwrite() {
        let store = InMemoryStore::new();
        let p = payment();
        store.insert_payment(&p).await.unwrap();

        let mut again = p.clone();
        again.status = PaymentStatus::Failed;
        let err = store.insert_payment(&again).await.unwrap_err();
        assert!(matches!(err, PaymentError::Storage { .. }));
        assert!(!err.is_retryable());
        assert_eq!(store.get_payment(p.id).await.unwrap(), Some(p));

        let payout = Payout::new(NewPayout {
            backend: "dummy".to_string(),
            shop_id: "shop-1".to_string(),
            customer_name: String::new(),
            description: String::new(),
            amount: None,
            ext_customer_id: None,
            currency_code: "PLN".to_string(),
        });
        store.insert_payout(&payout).await.unwrap();
        assert!(store.insert_payout(&payout).await.is_err());
    }
}

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::Repository;
use crate::payments::types::{Payment, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, order_id, backend, description, currency, amount_required, \
     amount_locked, amount_paid, amount_refunded, pending_refund, status, external_id, version, \
     created_on, updated_on, last_payment_on, refunded_on";

/// Row of the `payments` table
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: String,
    pub backend: String,
    pub description: String,
    pub currency: String,
    pub amount_required: Decimal,
    pub amount_locked: Decimal,
    pub amount_paid: Decimal,
    pub amount_refunded: Decimal,
    pub pending_refund: Option<Decimal>,
    pub status: String,
    pub external_id: Option<String>,
    pub version: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub last_payment_on: Option<DateTime<Utc>>,
    pub refunded_on: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status: PaymentStatus = row.status.parse().map_err(|_| {
            DatabaseError::invalid_data(format!("payment {} has status '{}'", row.id, row.status))
        })?;

        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            backend: row.backend,
            description: row.description,
            currency: row.currency,
            amount_required: row.amount_required,
            amount_locked: row.amount_locked,
            amount_paid: row.amount_paid,
            amount_refunded: row.amount_refunded,
            pending_refund: row.pending_refund,
            status,
            external_id: row.external_id,
            version: row.version,
            created_on: row.created_on,
            updated_on: row.updated_on,
            last_payment_on: row.last_payment_on,
            refunded_on: row.refunded_on,
        })
    }
}

/// Repository for payment records
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PaymentRepository {
    type Entity = Payment;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        let query = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn insert(&self, payment: &Payment) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, backend, description, currency, amount_required, \
             amount_locked, amount_paid, amount_refunded, pending_refund, status, external_id, \
             version, created_on, updated_on, last_payment_on, refunded_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(payment.id)
        .bind(&payment.order_id)
        .bind(&payment.backend)
        .bind(&payment.description)
        .bind(&payment.currency)
        .bind(payment.amount_required)
        .bind(payment.amount_locked)
        .bind(payment.amount_paid)
        .bind(payment.amount_refunded)
        .bind(payment.pending_refund)
        .bind(payment.status.as_str())
        .bind(&payment.external_id)
        .bind(payment.version)
        .bind(payment.created_on)
        .bind(payment.updated_on)
        .bind(payment.last_payment_on)
        .bind(payment.refunded_on)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).with_context(format!("inserting payment {}", payment.id)))?;
        Ok(())
    }

    async fn update(&self, payment: &Payment, expected_version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET amount_locked = $1, amount_paid = $2, amount_refunded = $3, \
             pending_refund = $4, status = $5, external_id = $6, version = $7, updated_on = $8, \
             last_payment_on = $9, refunded_on = $10 \
             WHERE id = $11 AND version = $12",
        )
        .bind(payment.amount_locked)
        .bind(payment.amount_paid)
        .bind(payment.amount_refunded)
        .bind(payment.pending_refund)
        .bind(payment.status.as_str())
        .bind(&payment.external_id)
        .bind(payment.version)
        .bind(payment.updated_on)
        .bind(payment.last_payment_on)
        .bind(payment.refunded_on)
        .bind(payment.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

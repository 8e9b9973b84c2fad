use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::Repository;
use crate::payments::types::{Payout, PayoutStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const PAYOUT_COLUMNS: &str = "id, backend, shop_id, customer_name, description, amount, \
     ext_customer_id, currency_code, external_id, status, failed_code, version, created_on, \
     updated_on";

/// Row of the `payouts` table
#[derive(Debug, Clone, FromRow)]
pub struct PayoutRow {
    pub id: Uuid,
    pub backend: String,
    pub shop_id: String,
    pub customer_name: String,
    pub description: String,
    pub amount: Option<Decimal>,
    pub ext_customer_id: Option<String>,
    pub currency_code: String,
    pub external_id: Option<String>,
    pub status: String,
    pub failed_code: Option<String>,
    pub version: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl TryFrom<PayoutRow> for Payout {
    type Error = DatabaseError;

    fn try_from(row: PayoutRow) -> Result<Self, Self::Error> {
        let status: PayoutStatus = row.status.parse().map_err(|_| {
            DatabaseError::invalid_data(format!("payout {} has status '{}'", row.id, row.status))
        })?;

        Ok(Payout {
            id: row.id,
            backend: row.backend,
            shop_id: row.shop_id,
            customer_name: row.customer_name,
            description: row.description,
            amount: row.amount,
            ext_customer_id: row.ext_customer_id,
            currency_code: row.currency_code,
            external_id: row.external_id,
            status,
            failed_code: row.failed_code,
            version: row.version,
            created_on: row.created_on,
            updated_on: row.updated_on,
        })
    }
}

/// Repository for payout records
#[derive(Clone)]
pub struct PayoutRepository {
    pool: PgPool,
}

impl PayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PayoutRepository {
    type Entity = Payout;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payout>> {
        let query = format!("SELECT {} FROM payouts WHERE id = $1", PAYOUT_COLUMNS);
        sqlx::query_as::<_, PayoutRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payout::try_from)
            .transpose()
    }

    async fn insert(&self, payout: &Payout) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO payouts (id, backend, shop_id, customer_name, description, amount, \
             ext_customer_id, currency_code, external_id, status, failed_code, version, \
             created_on, updated_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(payout.id)
        .bind(&payout.backend)
        .bind(&payout.shop_id)
        .bind(&payout.customer_name)
        .bind(&payout.description)
        .bind(payout.amount)
        .bind(&payout.ext_customer_id)
        .bind(&payout.currency_code)
        .bind(&payout.external_id)
        .bind(payout.status.as_str())
        .bind(&payout.failed_code)
        .bind(payout.version)
        .bind(payout.created_on)
        .bind(payout.updated_on)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).with_context(format!("inserting payout {}", payout.id)))?;
        Ok(())
    }

    async fn update(&self, payout: &Payout, expected_version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE payouts SET external_id = $1, status = $2, failed_code = $3, version = $4, \
             updated_on = $5 WHERE id = $6 AND version = $7",
        )
        .bind(&payout.external_id)
        .bind(payout.status.as_str())
        .bind(&payout.failed_code)
        .bind(payout.version)
        .bind(payout.updated_on)
        .bind(payout.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

//! Postgres repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::PaymentRepository;
use crate::error::Error;
use crate::payments::{Attempt, AttemptStatus, Payment, PaymentStatus};

/// Payment repository over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    external_id: Option<String>,
    destination_wallet: String,
    destination_mint: String,
    amount: i64,
    status: String,
    message: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    payment_id: Uuid,
    reference: String,
    source_wallet: String,
    source_mint: String,
    destination_wallet: String,
    destination_mint: String,
    amount: i64,
    discount_amount: i64,
    total_amount: i64,
    accrued_bonus_amount: i64,
    message: Option<String>,
    memo: Option<String>,
    apply_bonus: bool,
    tx_signature: Option<String>,
    status: String,
}

fn to_db_amount(amount: u64, field: &str) -> Result<i64, Error> {
    i64::try_from(amount)
        .map_err(|_| Error::InvalidParameter(format!("{field} is out of range")))
}

fn from_db_amount(amount: i64) -> u64 {
    u64::try_from(amount).unwrap_or(0)
}

impl TryFrom<PaymentRow> for Payment {
    type Error = Error;

    fn try_from(row: PaymentRow) -> Result<Self, Error> {
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            destination_wallet: row.destination_wallet,
            destination_mint: row.destination_mint,
            amount: from_db_amount(row.amount),
            status: row.status.parse().map_err(Error::Storage)?,
            message: row.message,
            expires_at: row.expires_at,
        })
    }
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self, Error> {
        Ok(Self {
            id: row.id,
            payment_id: row.payment_id,
            reference: row.reference,
            source_wallet: row.source_wallet,
            source_mint: row.source_mint,
            destination_wallet: row.destination_wallet,
            destination_mint: row.destination_mint,
            amount: from_db_amount(row.amount),
            discount_amount: from_db_amount(row.discount_amount),
            total_amount: from_db_amount(row.total_amount),
            accrued_bonus_amount: from_db_amount(row.accrued_bonus_amount),
            message: row.message,
            memo: row.memo,
            apply_bonus: row.apply_bonus,
            tx_signature: row.tx_signature,
            status: row.status.parse().map_err(Error::Storage)?,
        })
    }
}

impl PgRepository {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when a migration fails.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

const SELECT_PAYMENT: &str = "SELECT id, external_id, destination_wallet, destination_mint, \
     amount, status, message, expires_at FROM payments";

const SELECT_ATTEMPT: &str = "SELECT id, payment_id, reference, source_wallet, source_mint, \
     destination_wallet, destination_mint, amount, discount_amount, total_amount, \
     accrued_bonus_amount, message, memo, apply_bonus, tx_signature, status FROM transactions";

#[async_trait]
impl PaymentRepository for PgRepository {
    async fn create_payment(&self, payment: &Payment) -> Result<Payment, Error> {
        let row: PaymentRow = sqlx::query_as(
            "INSERT INTO payments \
             (id, external_id, destination_wallet, destination_mint, amount, status, message, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, external_id, destination_wallet, destination_mint, amount, status, message, expires_at",
        )
        .bind(payment.id)
        .bind(&payment.external_id)
        .bind(&payment.destination_wallet)
        .bind(&payment.destination_mint)
        .bind(to_db_amount(payment.amount, "amount")?)
        .bind(payment.status.as_str())
        .bind(&payment.message)
        .bind(payment.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict("payment with this external id already exists".into())
            }
            _ => err.into(),
        })?;
        row.try_into()
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(Error::NotFound("payment"))?.try_into()
    }

    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE external_id = $1"))
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(Error::NotFound("payment"))?.try_into()
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error> {
        let mut allowed: Vec<&str> = status.allowed_from().iter().map(|s| s.as_str()).collect();
        allowed.push(status.as_str());
        let result = sqlx::query(
            "UPDATE payments SET status = $2 WHERE id = $1 AND status = ANY($3)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        // Distinguish a missing payment from an illegal transition.
        let current = self.get_payment(id).await?;
        Err(Error::Conflict(format!("payment already {}", current.status)))
    }

    async fn mark_payments_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'expired' \
             WHERE status IN ('new', 'pending') AND expires_at IS NOT NULL AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt, Error> {
        let row: AttemptRow = sqlx::query_as(
            "INSERT INTO transactions \
             (id, payment_id, reference, source_wallet, source_mint, destination_wallet, \
              destination_mint, amount, discount_amount, total_amount, accrued_bonus_amount, \
              message, memo, apply_bonus, tx_signature, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING id, payment_id, reference, source_wallet, source_mint, destination_wallet, \
              destination_mint, amount, discount_amount, total_amount, accrued_bonus_amount, \
              message, memo, apply_bonus, tx_signature, status",
        )
        .bind(attempt.id)
        .bind(attempt.payment_id)
        .bind(&attempt.reference)
        .bind(&attempt.source_wallet)
        .bind(&attempt.source_mint)
        .bind(&attempt.destination_wallet)
        .bind(&attempt.destination_mint)
        .bind(to_db_amount(attempt.amount, "amount")?)
        .bind(to_db_amount(attempt.discount_amount, "discount_amount")?)
        .bind(to_db_amount(attempt.total_amount, "total_amount")?)
        .bind(to_db_amount(attempt.accrued_bonus_amount, "accrued_bonus_amount")?)
        .bind(&attempt.message)
        .bind(&attempt.memo)
        .bind(attempt.apply_bonus)
        .bind(&attempt.tx_signature)
        .bind(attempt.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error> {
        let row: Option<AttemptRow> =
            sqlx::query_as(&format!("{SELECT_ATTEMPT} WHERE reference = $1"))
                .bind(reference)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(Error::NotFound("attempt"))?.try_into()
    }

    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<&str>,
    ) -> Result<(), Error> {
        let mut allowed: Vec<&str> = status.allowed_from().iter().map(|s| s.as_str()).collect();
        allowed.push(status.as_str());
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, \
             tx_signature = COALESCE($3, tx_signature) \
             WHERE reference = $1 AND status = ANY($4)",
        )
        .bind(reference)
        .bind(status.as_str())
        .bind(signature)
        .bind(&allowed)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            // the one-completed-attempt-per-payment index
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict("payment already has a completed attempt".into())
            }
            _ => err.into(),
        })?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        // Distinguish a missing attempt from an illegal transition.
        let current = self.get_attempt_by_reference(reference).await?;
        Err(Error::Conflict(format!("attempt already {}", current.status)))
    }

    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error> {
        let rows: Vec<AttemptRow> =
            sqlx::query_as(&format!("{SELECT_ATTEMPT} WHERE status = 'pending'"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_attempts_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'expired' \
             WHERE status = 'pending' AND payment_id IN \
             (SELECT id FROM payments WHERE expires_at IS NOT NULL AND expires_at < now())",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

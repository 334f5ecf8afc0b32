use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Amount, InsertOutcome, NewTransaction, PaymentId, Transaction, TransactionKind},
    traits::{CapturedTotals, LedgerError},
};

pub async fn insert_transaction(
    payment_id: PaymentId,
    tx: NewTransaction,
    conn: &mut SqliteConnection,
) -> Result<Transaction, sqlx::Error> {
    let record: Transaction = sqlx::query_as(
        r#"
            INSERT INTO transactions (
                payment_id,
                kind,
                token,
                is_success,
                action_required,
                amount,
                currency,
                gateway_response,
                action_required_data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(tx.kind)
    .bind(tx.token)
    .bind(tx.is_success)
    .bind(tx.action_required)
    .bind(tx.amount)
    .bind(tx.currency)
    .bind(tx.gateway_response.to_string())
    .bind(tx.action_required_data.map(|v| v.to_string()))
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Transaction {}/{} recorded for payment {payment_id}", record.kind, record.token);
    Ok(record)
}

/// Appends the transaction unless a successful, final transaction with the same
/// `(kind, token)` already exists. The partial unique index on the transactions table
/// turns a lost race into a unique violation, which is mapped to a `Duplicate` outcome
/// carrying the already-recorded transaction.
pub async fn idempotent_insert(
    payment_id: PaymentId,
    tx: NewTransaction,
    conn: &mut SqliteConnection,
) -> Result<InsertOutcome, LedgerError> {
    let kind = tx.kind;
    let token = tx.token.clone();
    if let Some(existing) = fetch_last(payment_id, &[kind], Some(&token), true, conn).await? {
        trace!("🗃️ Transaction {kind}/{token} already recorded for payment {payment_id}");
        return Ok(InsertOutcome::Duplicate(existing));
    }
    match insert_transaction(payment_id, tx, conn).await {
        Ok(record) => Ok(InsertOutcome::Inserted(record)),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            let existing = fetch_last(payment_id, &[kind], Some(&token), true, conn)
                .await?
                .ok_or_else(|| LedgerError::DatabaseError(format!("Lost race on {kind}/{token} left no record")))?;
            Ok(InsertOutcome::Duplicate(existing))
        },
        Err(e) => Err(e.into()),
    }
}

/// Most-recent-first lookup over the payment's ledger. `successful_only` additionally
/// restricts the match to successful, non-action-required records, which is the filter
/// every duplicate gate uses.
pub async fn fetch_last(
    payment_id: PaymentId,
    kinds: &[TransactionKind],
    token: Option<&str>,
    successful_only: bool,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, LedgerError> {
    let mut builder = QueryBuilder::new("SELECT * FROM transactions WHERE payment_id = ");
    builder.push_bind(payment_id);
    if !kinds.is_empty() {
        let kind_list = kinds.iter().map(|k| format!("'{k}'")).collect::<Vec<_>>().join(",");
        builder.push(format!(" AND kind IN ({kind_list})"));
    }
    if let Some(token) = token {
        builder.push(" AND token = ");
        builder.push_bind(token.to_string());
    }
    if successful_only {
        builder.push(" AND is_success = 1 AND action_required = 0");
    }
    builder.push(" ORDER BY id DESC LIMIT 1");
    trace!("🗃️ Executing query: {}", builder.sql());
    let record = builder.build_query_as::<Transaction>().fetch_optional(conn).await?;
    Ok(record)
}

/// Capture and refund aggregates over the payment's successful, final transactions.
pub async fn aggregated_captured(
    payment_id: PaymentId,
    conn: &mut SqliteConnection,
) -> Result<CapturedTotals, LedgerError> {
    let captured: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount) FROM transactions \
         WHERE payment_id = $1 AND kind = 'Capture' AND is_success = 1 AND action_required = 0",
    )
    .bind(payment_id)
    .fetch_one(&mut *conn)
    .await?;
    let refunded_gross: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount) FROM transactions \
         WHERE payment_id = $1 AND kind = 'Refund' AND is_success = 1 AND action_required = 0",
    )
    .bind(payment_id)
    .fetch_one(&mut *conn)
    .await?;
    // Refunds the processor later reported as failed never moved any money. Their amounts
    // are compensated in the capture column by a restorative entry, so they must not
    // count towards the refunded total either.
    let refunded: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(t.amount) FROM transactions t \
         WHERE t.payment_id = $1 AND t.kind = 'Refund' AND t.is_success = 1 AND t.action_required = 0 \
         AND NOT EXISTS (\
            SELECT 1 FROM transactions f \
            WHERE f.payment_id = t.payment_id AND f.kind = 'RefundFailed' \
              AND f.token = t.token AND f.is_success = 1\
         )",
    )
    .bind(payment_id)
    .fetch_one(&mut *conn)
    .await?;
    let captured = Amount::from(captured.unwrap_or(0)) - Amount::from(refunded_gross.unwrap_or(0));
    Ok(CapturedTotals { captured, refunded: Amount::from(refunded.unwrap_or(0)) })
}

use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{ChargeStatus, NewPayment, Payment, PaymentId, PendingAction},
    traits::LedgerError,
};

pub async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, LedgerError> {
    let payment: Payment = sqlx::query_as(
        r#"
            INSERT INTO payments (
                gateway,
                is_active,
                total,
                currency,
                checkout_token,
                return_url,
                partial,
                psp_reference
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(payment.gateway)
    .bind(payment.is_active)
    .bind(payment.total)
    .bind(payment.currency)
    .bind(payment.checkout_token)
    .bind(payment.return_url)
    .bind(payment.partial)
    .bind(payment.psp_reference)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payment {} inserted for gateway {}", payment.id, payment.gateway);
    Ok(payment)
}

pub async fn fetch_payment(id: PaymentId, conn: &mut SqliteConnection) -> Result<Option<Payment>, LedgerError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_partial_sibling(
    gateway: &str,
    psp_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, LedgerError> {
    let payment = sqlx::query_as(
        r#"SELECT * FROM payments WHERE gateway = $1 AND psp_reference = $2 AND "partial" = 1"#,
    )
    .bind(gateway)
    .bind(psp_reference)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn set_charge_status(
    id: PaymentId,
    status: ChargeStatus,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    let result = sqlx::query("UPDATE payments SET charge_status = $1 WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::PaymentNotFound(id));
    }
    Ok(())
}

/// Attaches the order reference and clears the checkout reference, but only when no order
/// is attached yet. Returns `false` if another unit of work won the race.
pub async fn attach_order(
    id: PaymentId,
    order_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        "UPDATE payments SET order_reference = $1, checkout_token = NULL WHERE id = $2 AND order_reference IS NULL",
    )
    .bind(order_reference)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn store_pending_action(
    id: PaymentId,
    action: &PendingAction,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    let result = sqlx::query("UPDATE payments SET pending_action = $1 WHERE id = $2")
        .bind(action.to_json_string())
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::PaymentNotFound(id));
    }
    Ok(())
}

/// Reads the queued continuation request. Callers must pair this with [`clear_pending_action`]
/// inside the same transaction to get take-semantics.
pub async fn fetch_pending_action(
    id: PaymentId,
    conn: &mut SqliteConnection,
) -> Result<Option<PendingAction>, LedgerError> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT pending_action FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    let raw = match row {
        Some((raw,)) => raw,
        None => return Err(LedgerError::PaymentNotFound(id)),
    };
    match raw {
        Some(raw) => {
            let action = PendingAction::from_json_str(&raw).map_err(|e| LedgerError::CorruptRecord(e.to_string()))?;
            Ok(Some(action))
        },
        None => Ok(None),
    }
}

pub async fn clear_pending_action(id: PaymentId, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    sqlx::query("UPDATE payments SET pending_action = NULL WHERE id = $1").bind(id).execute(conn).await?;
    Ok(())
}

pub async fn deactivate_payment(id: PaymentId, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let result = sqlx::query("UPDATE payments SET is_active = 0 WHERE id = $1").bind(id).execute(conn).await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::PaymentNotFound(id));
    }
    Ok(())
}

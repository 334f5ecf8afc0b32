//! `SqliteDatabase` is the concrete SQLite backend for the Transaction Ledger.
//!
//! Every mutating method runs inside a single database transaction. SQLite allows one
//! writer at a time, so the webhook path and the synchronous confirmation path are
//! serialized for the same payment row, and the duplicate gates in the reconciler see a
//! consistent ledger.

use std::fmt::Debug;

use sqlx::SqlitePool;

use super::db::{db_url, new_pool, payments, transactions};
use crate::{
    db_types::{
        ChargeStatus,
        InsertOutcome,
        NewPayment,
        NewTransaction,
        Payment,
        PaymentId,
        PendingAction,
        Transaction,
        TransactionKind,
    },
    traits::{CapturedTotals, LedgerDatabase, LedgerError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from the environment.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LedgerDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::insert_payment(payment, &mut conn).await
    }

    async fn fetch_payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment(id, &mut conn).await
    }

    async fn record_transaction(&self, payment: &Payment, tx: NewTransaction) -> Result<Transaction, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let record = transactions::insert_transaction(payment.id, tx, &mut conn).await?;
        Ok(record)
    }

    async fn record_transaction_batch(
        &self,
        payment: &Payment,
        txs: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut db_tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(txs.len());
        for tx in txs {
            let record = transactions::insert_transaction(payment.id, tx, &mut db_tx).await?;
            records.push(record);
        }
        db_tx.commit().await?;
        Ok(records)
    }

    async fn fetch_partial_sibling(
        &self,
        gateway: &str,
        psp_reference: &str,
    ) -> Result<Option<Payment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_partial_sibling(gateway, psp_reference, &mut conn).await
    }

    async fn insert_transaction_once(
        &self,
        payment: &Payment,
        tx: NewTransaction,
    ) -> Result<InsertOutcome, LedgerError> {
        let mut db_tx = self.pool.begin().await?;
        let outcome = transactions::idempotent_insert(payment.id, tx, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(outcome)
    }

    async fn last_transaction(
        &self,
        payment: &Payment,
        kinds: &[TransactionKind],
        token: Option<&str>,
        successful_only: bool,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_last(payment.id, kinds, token, successful_only, &mut conn).await
    }

    async fn aggregated_captured(&self, payment: &Payment) -> Result<CapturedTotals, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        transactions::aggregated_captured(payment.id, &mut conn).await
    }

    async fn set_charge_status(&self, payment: &Payment, status: ChargeStatus) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::set_charge_status(payment.id, status, &mut conn).await
    }

    async fn attach_order(&self, payment: &Payment, order_reference: &str) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::attach_order(payment.id, order_reference, &mut conn).await
    }

    async fn store_pending_action(&self, payment: &Payment, action: &PendingAction) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::store_pending_action(payment.id, action, &mut conn).await
    }

    async fn take_pending_action(&self, payment: &Payment) -> Result<Option<PendingAction>, LedgerError> {
        let mut db_tx = self.pool.begin().await?;
        let action = payments::fetch_pending_action(payment.id, &mut db_tx).await?;
        if action.is_some() {
            payments::clear_pending_action(payment.id, &mut db_tx).await?;
        }
        db_tx.commit().await?;
        Ok(action)
    }

    async fn deactivate_payment(&self, payment: &Payment) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::deactivate_payment(payment.id, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

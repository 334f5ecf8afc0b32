use thiserror::Error;

use crate::db_types::{
    Amount,
    ChargeStatus,
    InsertOutcome,
    NewPayment,
    NewTransaction,
    Payment,
    PaymentId,
    PendingAction,
    Transaction,
    TransactionKind,
};

/// Ledger aggregates used to derive a payment's charge status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapturedTotals {
    /// Net of successful captures minus successful refunds.
    pub captured: Amount,
    /// Total of successful refunds, excluding refunds the processor later failed.
    pub refunded: Amount,
}

/// The Transaction Ledger contract.
///
/// Each mutating method must be atomic. `record_transaction` always inserts (the ledger is
/// append-only); the idempotency *check* is a caller-level decision, with
/// [`LedgerDatabase::insert_transaction_once`] as the race-safe variant that maps a
/// uniqueness violation on `(payment, kind, token)` to a `Duplicate` outcome.
#[allow(async_fn_in_trait)]
pub trait LedgerDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Creates a new payment row. Used when a checkout initiates payment, and by the
    /// partial-payment splitter for sibling rows.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError>;

    async fn fetch_payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError>;

    /// Unconditionally appends a transaction to the payment's ledger.
    async fn record_transaction(&self, payment: &Payment, tx: NewTransaction) -> Result<Transaction, LedgerError>;

    /// Appends several transactions as one atomic write. Either all of them land on the
    /// ledger or none do; compound bookkeeping entries (a failure record plus its
    /// compensating entry) must use this so a crash between the two cannot leave the
    /// aggregates inconsistent.
    async fn record_transaction_batch(
        &self,
        payment: &Payment,
        txs: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Looks up a partial-tender bookkeeping row by its processor reference, so a
    /// redelivered notification does not create the sibling twice.
    async fn fetch_partial_sibling(
        &self,
        gateway: &str,
        psp_reference: &str,
    ) -> Result<Option<Payment>, LedgerError>;

    /// Appends the transaction unless a successful, non-action-required transaction with
    /// the same `(kind, token)` already exists for this payment. This is the core
    /// at-most-once guarantee; duplicate webhook deliveries and the webhook/confirmation
    /// race both collapse into a `Duplicate` outcome here.
    async fn insert_transaction_once(
        &self,
        payment: &Payment,
        tx: NewTransaction,
    ) -> Result<InsertOutcome, LedgerError>;

    /// Most-recent-first lookup of the payment's transactions, filtered by kind and,
    /// optionally, by exact token match. With `successful_only` the match is further
    /// restricted to successful, non-action-required records, which is the filter every
    /// duplicate gate uses.
    async fn last_transaction(
        &self,
        payment: &Payment,
        kinds: &[TransactionKind],
        token: Option<&str>,
        successful_only: bool,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Capture and refund aggregates over the payment's successful transactions.
    async fn aggregated_captured(&self, payment: &Payment) -> Result<CapturedTotals, LedgerError>;

    async fn set_charge_status(&self, payment: &Payment, status: ChargeStatus) -> Result<(), LedgerError>;

    /// Sets the order reference and clears the checkout reference, but only if no order
    /// is attached yet. Returns `false` when another unit of work attached one first.
    async fn attach_order(&self, payment: &Payment, order_reference: &str) -> Result<bool, LedgerError>;

    async fn store_pending_action(&self, payment: &Payment, action: &PendingAction) -> Result<(), LedgerError>;

    /// Reads and clears the queued continuation request in one atomic step, so two
    /// concurrent redirect returns cannot both submit it.
    async fn take_pending_action(&self, payment: &Payment) -> Result<Option<PendingAction>, LedgerError>;

    async fn deactivate_payment(&self, payment: &Payment) -> Result<(), LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(PaymentId),
    #[error("Payment {0} already has an order attached")]
    OrderAlreadyAttached(PaymentId),
    #[error("Stored data could not be interpreted: {0}")]
    CorruptRecord(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

//! The reconciliation APIs.
//!
//! [`WebhookFlowApi`] is the asynchronous path: it routes processor notifications to the
//! per-event handlers and reconciles them against the ledger. [`ConfirmationApi`] is the
//! synchronous path for customers returning from a redirect. Both write into the same
//! ledger with the same duplicate gates, so whichever path arrives first materializes
//! the order and the other becomes a no-op.

mod confirmation;
mod order_materializer;
mod splitter;
mod webhook_flow;

use thiserror::Error;

pub use confirmation::{ConfirmationApi, ConfirmationRedirect};
pub use splitter::{parse_partial_tenders, split_partial_payments, PartialTender};
pub use webhook_flow::WebhookFlowApi;

use crate::{
    db_types::PaymentId,
    traits::{CheckoutError, LedgerError, ProcessorError},
};

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Checkout collaborator error: {0}")]
    Checkout(#[from] CheckoutError),
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("No continuation is pending for payment {0}")]
    MissingPendingAction(PaymentId),
    #[error("Malformed request: {0}")]
    Malformed(String),
}

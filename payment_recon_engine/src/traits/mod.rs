//! Contracts between the reconciliation core and its collaborators.
//!
//! * [`LedgerDatabase`] is the Transaction Ledger: payments and their append-only
//!   transaction records. Backends must keep every mutating method atomic; the SQLite
//!   backend runs each one inside a single database transaction, which is what makes
//!   the webhook path and the synchronous confirmation path mutually exclusive for the
//!   same payment.
//! * [`CheckoutOps`] is the external checkout/order domain. The reconciler only ever
//!   calls through this trait; it never owns cart contents, pricing or tax.
//! * [`ProcessorClient`] covers the synchronous outbound calls to the payment processor
//!   (refund, void, additional-detail confirmation). These are best-effort: a timeout
//!   or 5xx surfaces as an error and no ledger write happens.

mod collaborators;
mod ledger_database;

pub use collaborators::{
    CheckoutError,
    CheckoutOps,
    CompletedOrder,
    ProcessorClient,
    ProcessorError,
    ProcessorResponse,
};
pub use ledger_database::{CapturedTotals, LedgerDatabase, LedgerError};

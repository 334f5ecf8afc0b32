//! Payment Reconciliation Engine
//!
//! The engine reconciles payment-processor activity against a local ledger of payments
//! and their transactions. It is the trust boundary between asynchronous webhook
//! notifications, the synchronous browser-return confirmation path, and the checkout/order
//! domain: whatever the processor reports, the ledger decides exactly once whether an
//! order is created, a charge is recorded, or a refund is restored.
//!
//! The library is divided into three main sections:
//! 1. The ledger storage layer ([`mod@sqlite`]). SQLite is the supported backend. You
//!    should never need to touch the database directly; the data types it stores are
//!    public in [`mod@db_types`].
//! 2. The backend contracts ([`mod@traits`]): the [`traits::LedgerDatabase`] storage
//!    trait plus the [`traits::CheckoutOps`] and [`traits::ProcessorClient`] collaborator
//!    traits a server must provide.
//! 3. The reconciliation API ([`mod@recon_api`]): [`WebhookFlowApi`] for the webhook
//!    path and [`ConfirmationApi`] for returning customers.

pub mod db_types;
pub mod notification;
pub mod recon_api;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use recon_api::{ConfirmationApi, ConfirmationRedirect, ReconError, WebhookFlowApi};

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::db_types::{Amount, Payment, PaymentId};

//--------------------------------------     CheckoutOps      --------------------------------------------------------

/// The order produced by completing a checkout. The checkout/order domain owns everything
/// else about it; the reconciler only keeps the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedOrder {
    pub order_reference: String,
}

#[derive(Debug, Clone, Error)]
pub enum CheckoutError {
    /// The checkout is no longer valid (a line became unavailable, voucher expired, ...).
    /// This triggers the payment unwind in the order materializer.
    #[error("Checkout for payment {0} could not be completed: {1}")]
    CompletionFailed(PaymentId, String),
    #[error("Payment {0} has no checkout to complete")]
    CheckoutNotFound(PaymentId),
    #[error("Order service error: {0}")]
    ServiceError(String),
}

/// The external checkout/order collaborator.
#[allow(async_fn_in_trait)]
pub trait CheckoutOps: Clone {
    /// Completes the checkout attached to this payment and returns the created order.
    async fn complete_checkout(&self, payment: &Payment) -> Result<CompletedOrder, CheckoutError>;

    async fn order_authorized(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError>;

    async fn order_captured(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError>;

    async fn order_refunded(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError>;

    async fn cancel_order(&self, order_reference: &str) -> Result<(), CheckoutError>;

    /// Emits an order-visible audit note ("payment X request was successful/failed").
    async fn add_order_note(&self, order_reference: &str, note: &str) -> Result<(), CheckoutError>;
}

//--------------------------------------   ProcessorClient    --------------------------------------------------------

/// A definitive response from the processor to an outbound call.
#[derive(Debug, Clone)]
pub struct ProcessorResponse {
    pub psp_reference: String,
    pub result_code: String,
    /// Present when the customer must complete yet another action before the operation
    /// is final.
    pub action: Option<Value>,
    pub raw: Value,
}

impl ProcessorResponse {
    const SUCCESS_CODES: [&'static str; 4] = ["Authorised", "Received", "[refund-received]", "[cancel-received]"];

    pub fn is_success(&self) -> bool {
        Self::SUCCESS_CODES.contains(&self.result_code.as_str())
    }

    pub fn requires_action(&self) -> bool {
        self.action.is_some()
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    #[error("Processor call timed out: {0}")]
    Timeout(String),
    #[error("Processor request failed: {0}")]
    RequestFailed(String),
    #[error("Processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Synchronous, best-effort outbound calls to the payment processor. No ledger write may
/// happen before a definitive success/failure response.
#[allow(async_fn_in_trait)]
pub trait ProcessorClient: Clone {
    /// Requests a refund against the referenced prior capture.
    async fn refund(
        &self,
        payment: &Payment,
        reference: &str,
        amount: Amount,
    ) -> Result<ProcessorResponse, ProcessorError>;

    /// Voids the referenced prior authorisation.
    async fn void(&self, payment: &Payment, reference: &str) -> Result<ProcessorResponse, ProcessorError>;

    /// Continues a payment the customer returned from, echoing the parameters the
    /// processor asked for.
    async fn submit_additional_details(
        &self,
        payment_data: &str,
        details: &HashMap<String, String>,
    ) -> Result<ProcessorResponse, ProcessorError>;
}

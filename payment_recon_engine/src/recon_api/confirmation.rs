use std::{collections::HashMap, fmt::Debug};

use log::*;

use super::{order_materializer::materialize_order, ReconError};
use crate::{
    db_types::{NewTransaction, Payment, PaymentId, TransactionKind},
    traits::{CheckoutOps, LedgerDatabase, ProcessorClient},
};

/// Where to send the customer after the synchronous confirmation path completes. The
/// parameters are appended to the storefront return URL so it can resume the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRedirect {
    pub return_url: String,
    pub params: Vec<(String, String)>,
}

/// `ConfirmationApi` handles customers returning from a processor redirect (3-D-Secure
/// challenges and similar). It races the webhook path: both record the same
/// `ActionToConfirm` transaction, so whichever arrives second becomes a no-op.
pub struct ConfirmationApi<B, C, P> {
    db: B,
    checkout: C,
    processor: P,
    gateway_id: String,
}

impl<B, C, P> Debug for ConfirmationApi<B, C, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfirmationApi({})", self.gateway_id)
    }
}

impl<B, C, P> ConfirmationApi<B, C, P> {
    pub fn new(db: B, checkout: C, processor: P, gateway_id: impl Into<String>) -> Self {
        Self { db, checkout, processor, gateway_id: gateway_id.into() }
    }
}

impl<B, C, P> ConfirmationApi<B, C, P>
where
    B: LedgerDatabase,
    C: CheckoutOps,
    P: ProcessorClient,
{
    /// Completes a payment the customer returned from.
    ///
    /// The queued continuation request is taken (read-and-cleared) from the payment, the
    /// parameters the processor asked for are collected from the return request, and the
    /// result is submitted to the processor before anything is written to the ledger.
    /// A successful, action-free response materializes the order unless the webhook path
    /// got there first.
    pub async fn confirm_returned_customer(
        &self,
        payment_graph_id: &str,
        checkout_token: &str,
        params: &HashMap<String, String>,
    ) -> Result<ConfirmationRedirect, ReconError> {
        let payment = self.resolve_payment(payment_graph_id, checkout_token).await?;
        let return_url = payment
            .return_url
            .clone()
            .ok_or_else(|| ReconError::PaymentNotFound(format!("Payment {} has no return URL", payment.id)))?;
        if payment.has_order() {
            // The webhook path won the race and already materialized the order. The
            // customer just gets sent home.
            debug!("💳️ Payment {} already has an order. Redirecting the returned customer.", payment.id);
            return Ok(ConfirmationRedirect {
                return_url,
                params: vec![
                    ("checkout".to_string(), checkout_token.to_string()),
                    ("payment".to_string(), payment_graph_id.to_string()),
                    ("resultCode".to_string(), "Authorised".to_string()),
                ],
            });
        }
        // Validate against the stored copy first; a malformed return must not consume the
        // queued continuation, so the customer can be sent around again.
        let stored = payment
            .pending_action()
            .map_err(|e| ReconError::Malformed(e.to_string()))?
            .ok_or(ReconError::MissingPendingAction(payment.id))?;
        let mut details = HashMap::with_capacity(stored.expected_params.len());
        for name in &stored.expected_params {
            let value = params
                .get(name)
                .ok_or_else(|| ReconError::Malformed(format!("Missing continuation parameter {name}")))?;
            details.insert(name.clone(), value.clone());
        }
        // The atomic read-and-clear decides which of two concurrent returns proceeds.
        let action = self
            .db
            .take_pending_action(&payment)
            .await?
            .ok_or(ReconError::MissingPendingAction(payment.id))?;
        let response = self.processor.submit_additional_details(&action.payment_data, &details).await?;
        debug!(
            "💳️ Continuation for payment {} came back as {} [{}]",
            payment.id, response.result_code, response.psp_reference
        );
        let mut tx =
            NewTransaction::new(TransactionKind::ActionToConfirm, &response.psp_reference, payment.total, &payment.currency)
                .with_success(response.is_success())
                .with_gateway_response(response.raw.clone());
        if response.requires_action() {
            tx = tx.requires_action(response.action.clone());
        }
        let outcome = self.db.insert_transaction_once(&payment, tx).await?;
        if response.is_success() && !response.requires_action() && !payment.has_order() && outcome.is_inserted() {
            materialize_order(&self.db, &self.checkout, &self.processor, &payment).await?;
        }
        let mut redirect_params = vec![
            ("checkout".to_string(), checkout_token.to_string()),
            ("payment".to_string(), payment_graph_id.to_string()),
            ("resultCode".to_string(), response.result_code.clone()),
        ];
        if let Some(action) = response.action.as_ref().and_then(|a| a.as_object()) {
            // Another action round: the storefront drives it from the flattened fields.
            for (key, value) in action {
                if let Some(s) = value.as_str() {
                    redirect_params.push((key.clone(), s.to_string()));
                }
            }
        }
        Ok(ConfirmationRedirect { return_url, params: redirect_params })
    }

    /// All lookup failures collapse into `PaymentNotFound` so the endpoint does not leak
    /// which part of the address was wrong.
    async fn resolve_payment(&self, payment_graph_id: &str, checkout_token: &str) -> Result<Payment, ReconError> {
        let id = PaymentId::from_graph_id(payment_graph_id)
            .map_err(|_| ReconError::PaymentNotFound(payment_graph_id.to_string()))?;
        let payment = self
            .db
            .fetch_payment(id)
            .await?
            .ok_or_else(|| ReconError::PaymentNotFound(payment_graph_id.to_string()))?;
        if !payment.is_active || payment.gateway != self.gateway_id {
            return Err(ReconError::PaymentNotFound(payment_graph_id.to_string()));
        }
        // Order creation clears the checkout reference, so a payment with an order is
        // addressable without a token match.
        match &payment.checkout_token {
            Some(token) if token == checkout_token => Ok(payment),
            None if payment.has_order() => Ok(payment),
            _ => {
                info!("💳️ Checkout token mismatch on confirmation for payment {}", payment.id);
                Err(ReconError::PaymentNotFound(payment_graph_id.to_string()))
            },
        }
    }
}

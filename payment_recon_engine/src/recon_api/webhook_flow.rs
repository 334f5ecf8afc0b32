use std::fmt::Debug;

use log::*;

use super::{
    order_materializer::materialize_order,
    splitter::split_partial_payments,
    ReconError,
};
use crate::{
    db_types::{Amount, ChargeStatus, InsertOutcome, NewTransaction, Payment, PaymentId, TransactionKind},
    notification::{EventCode, Notification},
    traits::{CheckoutOps, LedgerDatabase, ProcessorClient},
};

/// `WebhookFlowApi` routes processor webhook notifications to per-event handlers and
/// reconciles them against the transaction ledger.
///
/// Every handler follows the same shape: resolve the payment from the merchant reference
/// (log and acknowledge if it is unknown, inactive or owned by another gateway), run the
/// duplicate gate for the target transaction kind, append the transaction, and only then
/// run the event-specific side effects.
pub struct WebhookFlowApi<B, C, P> {
    db: B,
    checkout: C,
    processor: P,
    gateway_id: String,
    auto_capture: bool,
}

impl<B, C, P> Debug for WebhookFlowApi<B, C, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookFlowApi({})", self.gateway_id)
    }
}

impl<B, C, P> WebhookFlowApi<B, C, P> {
    pub fn new(db: B, checkout: C, processor: P, gateway_id: impl Into<String>, auto_capture: bool) -> Self {
        Self { db, checkout, processor, gateway_id: gateway_id.into(), auto_capture }
    }
}

impl<B, C, P> WebhookFlowApi<B, C, P>
where
    B: LedgerDatabase,
    C: CheckoutOps,
    P: ProcessorClient,
{
    /// Dispatches a validated notification to its handler. Unknown event codes and
    /// informational codes are acknowledged without action.
    pub async fn process_notification(&self, n: &Notification) -> Result<(), ReconError> {
        let event = n.event();
        trace!("🔄️ Processing {event} notification [{}]", n.psp_reference);
        match event {
            EventCode::Authorisation => self.handle_authorisation(n).await,
            EventCode::Capture => self.handle_capture(n).await,
            EventCode::CaptureFailed => self.handle_capture_failed(n).await,
            EventCode::Cancellation => self.handle_cancellation(n).await,
            EventCode::CancelOrRefund => self.handle_cancel_or_refund(n).await,
            EventCode::Refund | EventCode::RefundWithData => self.handle_refund(n).await,
            EventCode::RefundFailed => self.handle_refund_failed(n).await,
            EventCode::RefundedReversed => self.handle_refund_reversed(n).await,
            EventCode::Pending => self.handle_pending(n).await,
            EventCode::AuthorisationAdjustment |
            EventCode::HandledExternally |
            EventCode::OrderOpened |
            EventCode::OrderClosed |
            EventCode::ProcessRetry |
            EventCode::ReportAvailable => {
                info!("🔄️ {event} notification [{}] acknowledged without action", n.psp_reference);
                Ok(())
            },
            EventCode::Unknown(code) => {
                warn!("🔄️ Unhandled webhook event code {code} [{}]. Acknowledging.", n.psp_reference);
                Ok(())
            },
        }
    }

    /// Resolves the payment addressed by the notification's merchant reference. Returns
    /// `None` (acknowledge, no-op) when the payment is unknown, inactive, or owned by a
    /// different gateway.
    async fn resolve_payment(&self, n: &Notification) -> Result<Option<Payment>, ReconError> {
        let id = match PaymentId::from_graph_id(&n.merchant_reference) {
            Ok(id) => id,
            Err(e) => {
                warn!("🔄️ Notification [{}] carries an undecodable merchant reference. {e}", n.psp_reference);
                return Ok(None);
            },
        };
        let payment = match self.db.fetch_payment(id).await? {
            Some(p) => p,
            None => {
                warn!("🔄️ Payment {id} referenced by notification [{}] was not found", n.psp_reference);
                return Ok(None);
            },
        };
        if !payment.is_active {
            info!("🔄️ Payment {id} is no longer active. Ignoring notification [{}]", n.psp_reference);
            return Ok(None);
        }
        if payment.gateway != self.gateway_id {
            info!("🔄️ Payment {id} belongs to gateway {}, not {}. Ignoring.", payment.gateway, self.gateway_id);
            return Ok(None);
        }
        Ok(Some(payment))
    }

    /// Step 5 of every handler: an order-visible audit note.
    async fn audit_note(&self, payment: &Payment, n: &Notification, outcome: &str) {
        let order = match &payment.order_reference {
            Some(order) => order.clone(),
            None => return,
        };
        let reason = n.reason.as_deref().unwrap_or("none given");
        let note = format!("Payment {} {} request was {outcome}, reason: {reason}", payment.id, n.event_code);
        if let Err(e) = self.checkout.add_order_note(&order, &note).await {
            warn!("🔄️ Could not record audit note on order {order}. {e}");
        }
    }

    /// Recomputes and stores the payment's charge status from the ledger aggregates.
    async fn refresh_charge_status(&self, payment: &Payment) -> Result<(), ReconError> {
        let totals = self.db.aggregated_captured(payment).await?;
        let status = ChargeStatus::derive(payment.total, totals.captured, totals.refunded);
        self.db.set_charge_status(payment, status).await?;
        debug!("🔄️ Payment {} charge status is now {status}", payment.id);
        Ok(())
    }

    /// Ensures the payment has an order, materializing one from the checkout if needed.
    /// An `ActionToConfirm` transaction is the at-most-once trigger: the customer may
    /// never return synchronously, so the webhook path must be able to create the order,
    /// while redelivery and the confirmation path collapse into a duplicate here.
    ///
    /// Returns the refreshed payment if an order is attached afterwards, `None` if order
    /// creation failed (the payment has been unwound) or was already done by a racer.
    async fn ensure_order(&self, payment: Payment, n: &Notification) -> Result<Option<Payment>, ReconError> {
        if payment.has_order() {
            return Ok(Some(payment));
        }
        let trigger = NewTransaction::new(
            TransactionKind::ActionToConfirm,
            &n.psp_reference,
            n.amount_value(),
            n.currency(),
        )
        .with_gateway_response(n.to_gateway_response());
        let payment = match self.db.insert_transaction_once(&payment, trigger).await? {
            InsertOutcome::Inserted(_) => payment,
            InsertOutcome::Duplicate(_) => {
                // The trigger is already on the ledger: a redelivery, or the confirmation
                // path got here first. Re-read the payment rather than assume the earlier
                // attempt finished its work.
                let current = match self.db.fetch_payment(payment.id).await? {
                    Some(p) => p,
                    None => return Ok(None),
                };
                if current.has_order() {
                    return Ok(Some(current));
                }
                if !current.is_active {
                    debug!("🔄️ Payment {} was unwound after an earlier trigger. Nothing to do.", current.id);
                    return Ok(None);
                }
                // The earlier attempt committed the trigger but failed before an order
                // landed (a transient checkout outage, say). Materialization is retried
                // here; the conditional order attach keeps it at-most-once.
                info!(
                    "🔄️ Order creation for payment {} was triggered earlier but no order exists. Retrying.",
                    current.id
                );
                current
            },
        };
        if materialize_order(&self.db, &self.checkout, &self.processor, &payment).await?.is_none() {
            return Ok(None);
        }
        let refreshed = self.db.fetch_payment(payment.id).await?;
        Ok(refreshed)
    }

    //------------------------------------  Authorisation  -----------------------------------------------------------

    async fn handle_authorisation(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let target = if self.auto_capture { TransactionKind::Capture } else { TransactionKind::Auth };
        if self.db.last_transaction(&payment, &[target], Some(&n.psp_reference), true).await?.is_some() {
            debug!("🔄️ Duplicate {target} notification [{}] for payment {}. Ignoring.", n.psp_reference, payment.id);
            return Ok(());
        }
        if !n.is_success() {
            let tx = NewTransaction::new(target, &n.psp_reference, n.amount_value(), n.currency())
                .failed()
                .with_gateway_response(n.to_gateway_response());
            self.db.record_transaction(&payment, tx).await?;
            if !payment.has_order() {
                // A refusal is terminal for an order-less payment; the materializer
                // refuses to create an order from this status.
                self.db.set_charge_status(&payment, ChargeStatus::Refused).await?;
            }
            self.audit_note(&payment, n, "failed").await;
            return Ok(());
        }
        let siblings = split_partial_payments(&self.db, n, &payment).await?;
        if !siblings.is_empty() {
            info!("🔄️ Created {} partial-tender sibling payments for payment {}", siblings.len(), payment.id);
        }
        let payment = match self.ensure_order(payment, n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let tx = NewTransaction::new(target, &n.psp_reference, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        if let InsertOutcome::Inserted(record) = self.db.insert_transaction_once(&payment, tx).await? {
            if let Some(order) = &payment.order_reference {
                match target {
                    TransactionKind::Capture => {
                        self.refresh_charge_status(&payment).await?;
                        self.checkout.order_captured(order, record.amount).await?;
                    },
                    _ => self.checkout.order_authorized(order, record.amount).await?,
                }
            }
            self.audit_note(&payment, n, "successful").await;
        }
        Ok(())
    }

    //------------------------------------     Capture     -----------------------------------------------------------

    async fn handle_capture(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.db.last_transaction(&payment, &[TransactionKind::Capture], Some(&n.psp_reference), true).await?.is_some()
        {
            debug!("🔄️ Duplicate capture notification [{}] for payment {}. Ignoring.", n.psp_reference, payment.id);
            return Ok(());
        }
        if !n.is_success() {
            let tx = NewTransaction::new(TransactionKind::Capture, &n.psp_reference, n.amount_value(), n.currency())
                .failed()
                .with_gateway_response(n.to_gateway_response());
            self.db.record_transaction(&payment, tx).await?;
            self.audit_note(&payment, n, "failed").await;
            return Ok(());
        }
        // A capture can overtake its authorisation; tolerate out-of-order delivery by
        // creating the order here if it does not exist yet.
        let payment = match self.ensure_order(payment, n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let tx = NewTransaction::new(TransactionKind::Capture, &n.psp_reference, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        if let InsertOutcome::Inserted(record) = self.db.insert_transaction_once(&payment, tx).await? {
            self.refresh_charge_status(&payment).await?;
            if let Some(order) = &payment.order_reference {
                self.checkout.order_captured(order, record.amount).await?;
            }
            self.audit_note(&payment, n, "successful").await;
        }
        Ok(())
    }

    async fn handle_capture_failed(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let tx = NewTransaction::new(TransactionKind::CaptureFailed, &n.psp_reference, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        if self.db.insert_transaction_once(&payment, tx).await?.is_inserted() {
            warn!("🔄️ Capture [{}] for payment {} failed at the processor", n.psp_reference, payment.id);
            self.audit_note(&payment, n, "failed").await;
        }
        Ok(())
    }

    //------------------------------------   Cancellation  -----------------------------------------------------------

    async fn handle_cancellation(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.db.last_transaction(&payment, &[TransactionKind::Cancel], Some(&n.psp_reference), true).await?.is_some()
        {
            debug!("🔄️ Duplicate cancellation [{}] for payment {}. Ignoring.", n.psp_reference, payment.id);
            return Ok(());
        }
        let tx = NewTransaction::new(TransactionKind::Cancel, &n.psp_reference, n.amount_value(), n.currency())
            .with_success(n.is_success())
            .with_gateway_response(n.to_gateway_response());
        let outcome = self.db.insert_transaction_once(&payment, tx).await?;
        if n.is_success() && outcome.is_inserted() {
            self.db.set_charge_status(&payment, ChargeStatus::Cancelled).await?;
            if let Some(order) = &payment.order_reference {
                self.checkout.cancel_order(order).await?;
            }
        }
        self.audit_note(&payment, n, if n.is_success() { "successful" } else { "failed" }).await;
        Ok(())
    }

    async fn handle_cancel_or_refund(&self, n: &Notification) -> Result<(), ReconError> {
        match n.modification_action() {
            Some("cancel") => self.handle_cancellation(n).await,
            Some("refund") => self.handle_refund(n).await,
            action => {
                warn!(
                    "🔄️ CANCEL_OR_REFUND notification [{}] carries unknown modification action {action:?}. \
                     Acknowledging.",
                    n.psp_reference
                );
                Ok(())
            },
        }
    }

    //------------------------------------      Refund     -----------------------------------------------------------

    async fn handle_refund(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.db.last_transaction(&payment, &[TransactionKind::Refund], Some(&n.psp_reference), true).await?.is_some()
        {
            debug!("🔄️ Duplicate refund notification [{}] for payment {}. Ignoring.", n.psp_reference, payment.id);
            return Ok(());
        }
        if !n.is_success() {
            let tx = NewTransaction::new(TransactionKind::Refund, &n.psp_reference, n.amount_value(), n.currency())
                .failed()
                .with_gateway_response(n.to_gateway_response());
            self.db.record_transaction(&payment, tx).await?;
            self.audit_note(&payment, n, "failed").await;
            return Ok(());
        }
        let tx = NewTransaction::new(TransactionKind::Refund, &n.psp_reference, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        if let InsertOutcome::Inserted(record) = self.db.insert_transaction_once(&payment, tx).await? {
            self.refresh_charge_status(&payment).await?;
            if let Some(order) = &payment.order_reference {
                self.checkout.order_refunded(order, record.amount).await?;
            }
            self.audit_note(&payment, n, "successful").await;
        }
        Ok(())
    }

    /// A refund we requested (or had confirmed) has failed at the processor. The ledger
    /// must be restored to its pre-refund state:
    /// * refund never initiated by us: acknowledge without action;
    /// * already recorded as failed: duplicate, ignore;
    /// * refund was still in flight (`RefundOngoing`): record the failure plus a
    ///   zero-amount transaction of the prior kind, leaving capture accounting unchanged;
    /// * refund was confirmed: record the failure plus a restorative `Capture` for the
    ///   same amount, because the money effectively never left.
    async fn handle_refund_failed(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let token = n.psp_reference.as_str();
        let refund_kinds = [TransactionKind::Refund, TransactionKind::RefundOngoing];
        let refund_tx = match self.db.last_transaction(&payment, &refund_kinds, Some(token), false).await? {
            Some(tx) => tx,
            None => {
                info!(
                    "🔄️ Refund failure [{token}] for payment {} does not match any refund we initiated. \
                     Acknowledging.",
                    payment.id
                );
                return Ok(());
            },
        };
        if self.db.last_transaction(&payment, &[TransactionKind::RefundFailed], Some(token), true).await?.is_some() {
            debug!("🔄️ Duplicate refund-failed notification [{token}] for payment {}. Ignoring.", payment.id);
            return Ok(());
        }
        let prior_kinds = [TransactionKind::Capture, TransactionKind::Auth];
        let prior_kind = self
            .db
            .last_transaction(&payment, &prior_kinds, None, true)
            .await?
            .map(|tx| tx.kind)
            .unwrap_or(TransactionKind::Capture);
        let failure = NewTransaction::new(TransactionKind::RefundFailed, token, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        let (restore_kind, restore_amount) = match refund_tx.kind {
            TransactionKind::RefundOngoing => (prior_kind, Amount::ZERO),
            _ => (TransactionKind::Capture, refund_tx.amount),
        };
        let restore = NewTransaction::new(restore_kind, token, restore_amount, n.currency()).with_gateway_response(
            serde_json::json!({"restoredAfterFailedRefund": token}),
        );
        // The failure record and its compensating entry stand or fall together; a partial
        // write would block redelivery at the duplicate gate with the aggregates skewed.
        self.db.record_transaction_batch(&payment, vec![failure, restore]).await?;
        self.refresh_charge_status(&payment).await?;
        self.audit_note(&payment, n, "failed").await;
        Ok(())
    }

    /// Money came back from a previously successful refund (e.g. bad bank details).
    /// Audit-only.
    async fn handle_refund_reversed(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let tx = NewTransaction::new(TransactionKind::RefundReversed, &n.psp_reference, n.amount_value(), n.currency())
            .with_gateway_response(n.to_gateway_response());
        if self.db.insert_transaction_once(&payment, tx).await?.is_inserted() {
            warn!("🔄️ Refund [{}] for payment {} was reversed by the processor", n.psp_reference, payment.id);
            self.audit_note(&payment, n, "reversed").await;
        }
        Ok(())
    }

    /// Resolution is delayed at the processor. Audit-only.
    async fn handle_pending(&self, n: &Notification) -> Result<(), ReconError> {
        let payment = match self.resolve_payment(n).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let tx = NewTransaction::new(TransactionKind::Pending, &n.psp_reference, n.amount_value(), n.currency())
            .with_success(n.is_success())
            .with_gateway_response(n.to_gateway_response());
        if self.db.insert_transaction_once(&payment, tx).await?.is_inserted() {
            info!("🔄️ Payment {} is pending at the processor [{}]", payment.id, n.psp_reference);
            self.audit_note(&payment, n, "pending").await;
        }
        Ok(())
    }
}

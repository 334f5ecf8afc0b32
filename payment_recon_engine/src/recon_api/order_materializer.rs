use log::*;

use super::ReconError;
use crate::{
    db_types::{NewTransaction, Payment, TransactionKind},
    traits::{CheckoutError, CheckoutOps, CompletedOrder, LedgerDatabase, ProcessorClient},
};

/// Completes the payment's checkout and attaches the resulting order reference.
///
/// The caller is responsible for holding the at-most-once trigger (the `ActionToConfirm`
/// transaction); this function handles the second half of the guarantee via the
/// conditional [`LedgerDatabase::attach_order`] update, so even if two triggers slip
/// through, only one order reference ever lands on the payment.
///
/// When the checkout can no longer be completed, the money already taken is returned to
/// the customer ([`unwind_payment`]) and `Ok(None)` is returned.
pub async fn materialize_order<B, C, P>(
    db: &B,
    checkout: &C,
    processor: &P,
    payment: &Payment,
) -> Result<Option<CompletedOrder>, ReconError>
where
    B: LedgerDatabase,
    C: CheckoutOps,
    P: ProcessorClient,
{
    if !payment.charge_status.can_create_order() {
        info!("🛍️ Payment {} is {}, which does not permit order creation", payment.id, payment.charge_status);
        return Ok(None);
    }
    let order = match checkout.complete_checkout(payment).await {
        Ok(order) => order,
        Err(CheckoutError::CompletionFailed(id, reason)) => {
            warn!("🛍️ Checkout for payment {id} could not be completed ({reason}). Unwinding the payment.");
            unwind_payment(db, processor, payment).await?;
            return Ok(None);
        },
        Err(e) => return Err(e.into()),
    };
    if db.attach_order(payment, &order.order_reference).await? {
        info!("🛍️ Order {} created for payment {}", order.order_reference, payment.id);
        Ok(Some(order))
    } else {
        debug!("🛍️ Payment {} already had an order attached. Keeping the existing one.", payment.id);
        Ok(None)
    }
}

/// Returns captured money (refund) or releases the hold (void) after order creation
/// failed, then deactivates the payment. The processor call happens first; only a
/// definitive response is recorded in the ledger, so a retry after a crash re-runs the
/// whole unwind.
pub async fn unwind_payment<B, P>(db: &B, processor: &P, payment: &Payment) -> Result<(), ReconError>
where
    B: LedgerDatabase,
    P: ProcessorClient,
{
    let totals = db.aggregated_captured(payment).await?;
    // The order-creation trigger always precedes an unwind, so its token is available as
    // a fallback reference even when no capture or authorisation has been recorded yet.
    let prior_kinds = [TransactionKind::Capture, TransactionKind::Auth, TransactionKind::ActionToConfirm];
    let reference = db
        .last_transaction(payment, &prior_kinds, None, true)
        .await?
        .map(|tx| tx.token)
        .or_else(|| payment.psp_reference.clone())
        .ok_or_else(|| {
            ReconError::Malformed(format!("Payment {} has no processor reference to unwind against", payment.id))
        })?;
    if totals.captured.is_positive() {
        let response = processor.refund(payment, &reference, totals.captured).await?;
        let tx =
            NewTransaction::new(TransactionKind::RefundOngoing, &response.psp_reference, totals.captured, &payment.currency)
                .with_gateway_response(response.raw);
        db.record_transaction(payment, tx).await?;
        info!("🛍️ Requested refund of {} for unwound payment {}", totals.captured, payment.id);
    } else {
        let response = processor.void(payment, &reference).await?;
        let tx = NewTransaction::new(TransactionKind::Void, &response.psp_reference, payment.total, &payment.currency)
            .with_gateway_response(response.raw);
        db.record_transaction(payment, tx).await?;
        info!("🛍️ Voided authorisation for unwound payment {}", payment.id);
    }
    db.deactivate_payment(payment).await?;
    Ok(())
}

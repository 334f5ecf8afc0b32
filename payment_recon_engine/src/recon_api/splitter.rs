//! Partial-payment splitting.
//!
//! When the customer pays with several tenders (gift card plus card, for instance), the
//! processor authorises them as one payment and reports the individual tenders in
//! `additionalData` as `order-<n>-pspReference` / `order-<n>-paymentAmount` /
//! `order-<n>-paymentMethod` triples. The ledger keeps one inactive sibling payment row
//! per extra tender so refund accounting can address each tender separately.

use std::sync::OnceLock;

use log::*;
use regex::Regex;

use super::ReconError;
use crate::{
    db_types::{Amount, NewPayment, Payment},
    notification::Notification,
    traits::LedgerDatabase,
};

/// One tender of a split payment, as reported in the notification's additional data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialTender {
    pub index: u32,
    pub psp_reference: String,
    pub amount: Amount,
    pub currency: String,
    pub method: Option<String>,
}

fn tender_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The unwrap is safe: the pattern is a literal.
    RE.get_or_init(|| Regex::new(r"^order-(\d+)-pspReference$").unwrap())
}

/// Extracts the partial tenders from a notification's additional data, sorted by tender
/// index. The primary tender (the one carrying the notification's own psp reference) is
/// excluded; it is accounted for on the payment itself.
pub fn parse_partial_tenders(n: &Notification) -> Vec<PartialTender> {
    let re = tender_reference_re();
    let mut tenders = Vec::new();
    for (key, value) in &n.additional_data {
        let Some(caps) = re.captures(key) else { continue };
        let Some(reference) = value.as_str() else { continue };
        if reference == n.psp_reference {
            continue;
        }
        let index: u32 = match caps[1].parse() {
            Ok(i) => i,
            Err(_) => continue,
        };
        let raw_amount = match n.additional_str(&format!("order-{index}-paymentAmount")) {
            Some(a) => a,
            None => {
                warn!("💰️ Tender {index} on [{}] has a reference but no amount. Skipping it.", n.psp_reference);
                continue;
            },
        };
        // Amounts arrive as "EUR 150.00".
        let Some((currency, major)) = raw_amount.split_once(' ') else {
            warn!("💰️ Tender {index} on [{}] has a malformed amount {raw_amount:?}. Skipping it.", n.psp_reference);
            continue;
        };
        let amount = match Amount::parse_major(major) {
            Ok(a) => a,
            Err(e) => {
                warn!("💰️ Tender {index} on [{}] has an unparseable amount ({e}). Skipping it.", n.psp_reference);
                continue;
            },
        };
        let method = n.additional_str(&format!("order-{index}-paymentMethod")).map(String::from);
        tenders.push(PartialTender { index, psp_reference: reference.to_string(), amount, currency: currency.to_string(), method });
    }
    tenders.sort_by_key(|t| t.index);
    tenders
}

/// Creates an inactive sibling payment row for every extra tender reported on the
/// notification. Returns the newly created rows. Tenders are looked up by their processor
/// reference first, so a redelivered notification never duplicates a sibling, even when
/// the first delivery failed partway through.
pub async fn split_partial_payments<B: LedgerDatabase>(
    db: &B,
    n: &Notification,
    payment: &Payment,
) -> Result<Vec<Payment>, ReconError> {
    let tenders = parse_partial_tenders(n);
    if tenders.is_empty() {
        return Ok(Vec::new());
    }
    let mut siblings = Vec::with_capacity(tenders.len());
    for tender in tenders {
        if db.fetch_partial_sibling(&payment.gateway, &tender.psp_reference).await?.is_some() {
            debug!("💰️ Partial tender {} is already on the books. Skipping it.", tender.psp_reference);
            continue;
        }
        debug!(
            "💰️ Recording partial tender {} ({} {}) for payment {}",
            tender.psp_reference, tender.currency, tender.amount, payment.id
        );
        let sibling = NewPayment::new(&payment.gateway, tender.amount, &tender.currency)
            .as_partial_sibling(&tender.psp_reference);
        let row = db.insert_payment(sibling).await?;
        siblings.push(row);
    }
    Ok(siblings)
}

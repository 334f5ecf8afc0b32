//! End-to-end webhook reconciliation flows against a real SQLite ledger.

use log::*;
use payment_recon_engine::{
    db_types::{Amount, ChargeStatus, NewTransaction, TransactionKind},
    traits::LedgerDatabase,
    SqliteDatabase,
    WebhookFlowApi,
};
use sqlx::SqlitePool;
use tokio::runtime::Runtime;

mod support;

use support::{new_test_ledger, notification, seed_payment, MockCheckout, MockProcessor, GATEWAY};

async fn transaction_count(pool: &SqlitePool, payment_id: i64, kind: &str) -> i64 {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM transactions WHERE payment_id = ? AND kind = ?"#)
        .bind(payment_id)
        .bind(kind)
        .fetch_one(pool)
        .await
        .expect("Error counting transactions")
}

fn api(db: &SqliteDatabase, checkout: &MockCheckout, processor: &MockProcessor, auto_capture: bool) -> WebhookFlowApi<SqliteDatabase, MockCheckout, MockProcessor> {
    WebhookFlowApi::new(db.clone(), checkout.clone(), processor.clone(), GATEWAY, auto_capture)
}

#[test]
fn authorisation_creates_order_exactly_once() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        let n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);

        flow.process_notification(&n).await.expect("Error processing notification");
        // The processor redelivers the exact same notification.
        flow.process_notification(&n).await.expect("Error processing redelivery");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.order_reference.as_deref(), Some("ORD-1"));
        assert!(payment.checkout_token.is_none(), "checkout reference must be cleared at order creation");
        assert_eq!(checkout.completions(), 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "ActionToConfirm").await, 1);
        let authorized =
            checkout.calls().iter().filter(|c| c.starts_with("order_authorized(ORD-1")).count();
        assert_eq!(authorized, 1, "checkout must hear about the authorisation exactly once");
        info!("🚀️ idempotency test complete");
    });
}

#[test]
fn auto_capture_records_a_capture_and_charges_fully() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        let n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);

        flow.process_notification(&n).await.expect("Error processing notification");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.charge_status, ChargeStatus::FullyCharged);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Capture").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 0);
        assert!(checkout.calls().iter().any(|c| c.starts_with("order_captured(ORD-1")));
    });
}

#[test]
fn capture_overtaking_its_authorisation_still_creates_the_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;

        // CAPTURE arrives first.
        let capture = notification(&payment, "CAPTURE", "PSP-CAP-1", 15_000);
        flow.process_notification(&capture).await.expect("Error processing capture");
        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.order_reference.as_deref(), Some("ORD-1"));
        assert_eq!(fetched.charge_status, ChargeStatus::FullyCharged);

        // The late AUTHORISATION is recorded against the existing order.
        let auth = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        flow.process_notification(&auth).await.expect("Error processing late authorisation");
        assert_eq!(checkout.completions(), 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Capture").await, 1);
    });
}

#[test]
fn transient_checkout_failure_is_retried_on_redelivery() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        // The order service is down for the first completion attempt only.
        let checkout = MockCheckout::with_transient_failures(1);
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        let mut n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        n.additional_data.insert("order-1-pspReference".into(), serde_json::json!("PSP-AUTH-1"));
        n.additional_data.insert("order-1-paymentAmount".into(), serde_json::json!("EUR 100.00"));
        n.additional_data.insert("order-2-pspReference".into(), serde_json::json!("PSP-GIFT-1"));
        n.additional_data.insert("order-2-paymentAmount".into(), serde_json::json!("EUR 50.00"));

        flow.process_notification(&n)
            .await
            .expect_err("An order-service outage must surface so the processor redelivers");
        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert!(fetched.order_reference.is_none());
        assert!(fetched.is_active, "a transient failure must not unwind the payment");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 0);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "ActionToConfirm").await, 1);

        // Redelivery finds the committed trigger and retries materialization rather than
        // treating the duplicate as finished work.
        flow.process_notification(&n).await.expect("Error processing redelivery");
        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.order_reference.as_deref(), Some("ORD-1"));
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "ActionToConfirm").await, 1);
        let authorized = checkout.calls().iter().filter(|c| c.starts_with("order_authorized(ORD-1")).count();
        assert_eq!(authorized, 1, "checkout must hear about the authorisation exactly once");
        // Sibling rows written before the outage are not duplicated by the retry.
        let siblings: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM payments WHERE "partial" = 1"#)
            .fetch_one(db.pool())
            .await
            .expect("Error counting siblings");
        assert_eq!(siblings, 1);
    });
}

#[test]
fn failed_notification_is_recorded_without_an_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        let mut n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        n.success = "false".to_string();
        n.reason = Some("FRAUD-CANCELLED".to_string());

        flow.process_notification(&n).await.expect("Error processing notification");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert!(payment.order_reference.is_none());
        assert_eq!(payment.charge_status, ChargeStatus::Refused, "a terminal refusal is recorded on the payment");
        assert_eq!(checkout.completions(), 0);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 1);
        let failed = db
            .last_transaction(&payment, &[TransactionKind::Auth], Some("PSP-AUTH-1"), false)
            .await
            .unwrap()
            .expect("Failed auth should be on the ledger");
        assert!(!failed.is_success);
        // A redelivery of the failed notification must not be blocked by the duplicate
        // gate, which only considers successful transactions.
        flow.process_notification(&n).await.expect("Error processing redelivery");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 2);
    });
}

#[test]
fn uncompletable_checkout_voids_the_authorisation() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::failing_completion();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        let n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);

        flow.process_notification(&n).await.expect("Error processing notification");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert!(payment.order_reference.is_none());
        assert!(!payment.is_active, "unwound payments are deactivated");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Void").await, 1);
        assert!(processor.calls().iter().any(|c| c.contains("void(")), "hold must be released at the processor");
    });
}

#[test]
fn uncompletable_checkout_refunds_captured_money() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::failing_completion();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        // Money was already captured before the order could be created.
        let prior = NewTransaction::new(TransactionKind::Capture, "PSP-CAP-0", Amount::from(15_000), "EUR");
        db.record_transaction(&payment, prior).await.expect("Error seeding capture");

        let n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        flow.process_notification(&n).await.expect("Error processing notification");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert!(!payment.is_active);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "RefundOngoing").await, 1);
        assert!(
            processor.calls().iter().any(|c| c.contains("refund(") && c.contains("PSP-CAP-0")),
            "captured money must be returned against the capture reference"
        );
    });
}

#[test]
fn refund_updates_charge_status_and_the_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");

        let refund = notification(&payment, "REFUND", "PSP-REF-1", 5_000);
        flow.process_notification(&refund).await.expect("Error processing refund");
        flow.process_notification(&refund).await.expect("Error processing redelivered refund");

        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.charge_status, ChargeStatus::PartiallyRefunded);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Refund").await, 1);
        let refunded = checkout.calls().iter().filter(|c| c.starts_with("order_refunded(")).count();
        assert_eq!(refunded, 1);

        // Refund the rest.
        flow.process_notification(&notification(&payment, "REFUND", "PSP-REF-2", 10_000))
            .await
            .expect("Error processing second refund");
        let payment = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.charge_status, ChargeStatus::FullyRefunded);
    });
}

#[test]
fn failed_confirmed_refund_restores_the_capture() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");
        flow.process_notification(&notification(&payment, "REFUND", "PSP-REF-1", 15_000))
            .await
            .expect("Error processing refund");
        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.charge_status, ChargeStatus::FullyRefunded);

        // The bank bounced the refund after the processor had confirmed it.
        let failure = notification(&payment, "REFUND_FAILED", "PSP-REF-1", 15_000);
        flow.process_notification(&failure).await.expect("Error processing refund failure");

        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.charge_status, ChargeStatus::FullyCharged, "the money never actually left");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "RefundFailed").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Capture").await, 2);

        // Redelivery of the failure must not double-restore.
        flow.process_notification(&failure).await.expect("Error processing redelivered failure");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Capture").await, 2);
    });
}

#[test]
fn failed_in_flight_refund_leaves_accounting_unchanged() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");
        // An unconfirmed refund request is still in flight.
        let in_flight = NewTransaction::new(TransactionKind::RefundOngoing, "PSP-REF-1", Amount::from(15_000), "EUR");
        db.record_transaction(&payment, in_flight).await.expect("Error seeding refund request");

        let failure = notification(&payment, "REFUND_FAILED", "PSP-REF-1", 15_000);
        flow.process_notification(&failure).await.expect("Error processing refund failure");

        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.charge_status, ChargeStatus::FullyCharged);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "RefundFailed").await, 1);
        let zero_restore = db
            .last_transaction(&fetched, &[TransactionKind::Capture], Some("PSP-REF-1"), true)
            .await
            .unwrap()
            .expect("Zero-amount restore record should exist");
        assert_eq!(zero_restore.amount, Amount::ZERO);
    });
}

#[test]
fn refund_failure_for_an_unknown_refund_is_ignored() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");

        let failure = notification(&payment, "REFUND_FAILED", "PSP-NEVER-SEEN", 15_000);
        flow.process_notification(&failure).await.expect("Error processing refund failure");

        assert_eq!(transaction_count(db.pool(), payment.id.0, "RefundFailed").await, 0);
        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.charge_status, ChargeStatus::FullyCharged);
    });
}

#[test]
fn cancellation_cancels_the_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");

        let cancel = notification(&payment, "CANCELLATION", "PSP-CAN-1", 15_000);
        flow.process_notification(&cancel).await.expect("Error processing cancellation");
        flow.process_notification(&cancel).await.expect("Error processing redelivered cancellation");

        let fetched = db.fetch_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.charge_status, ChargeStatus::Cancelled);
        let cancels = checkout.calls().iter().filter(|c| c.starts_with("cancel_order(")).count();
        assert_eq!(cancels, 1);
    });
}

#[test]
fn cancel_or_refund_redispatches_on_the_modification_action() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        flow.process_notification(&notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000))
            .await
            .expect("Error processing authorisation");

        let mut n = notification(&payment, "CANCEL_OR_REFUND", "PSP-COR-1", 15_000);
        n.additional_data.insert("modification.action".into(), serde_json::json!("refund"));
        flow.process_notification(&n).await.expect("Error processing cancel-or-refund");

        assert_eq!(transaction_count(db.pool(), payment.id.0, "Refund").await, 1);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Cancel").await, 0);

        // Without a recognizable action the notification is acknowledged with no ledger write.
        let mut unknown = notification(&payment, "CANCEL_OR_REFUND", "PSP-COR-2", 15_000);
        unknown.additional_data.insert("modification.action".into(), serde_json::json!("escalate"));
        flow.process_notification(&unknown).await.expect("Error processing unknown modification");
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Refund").await, 1);
    });
}

#[test]
fn partial_tenders_create_sibling_payments() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, true);
        let payment = seed_payment(&db, 15_000).await;
        let mut n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        n.additional_data.insert("order-1-pspReference".into(), serde_json::json!("PSP-AUTH-1"));
        n.additional_data.insert("order-1-paymentAmount".into(), serde_json::json!("EUR 100.00"));
        n.additional_data.insert("order-2-pspReference".into(), serde_json::json!("PSP-GIFT-1"));
        n.additional_data.insert("order-2-paymentAmount".into(), serde_json::json!("EUR 50.00"));
        n.additional_data.insert("order-2-paymentMethod".into(), serde_json::json!("givex"));

        flow.process_notification(&n).await.expect("Error processing notification");
        flow.process_notification(&n).await.expect("Error processing redelivery");

        let siblings: Vec<(i64, bool)> =
            sqlx::query_as(r#"SELECT total, is_active FROM payments WHERE "partial" = 1"#)
                .fetch_all(db.pool())
                .await
                .expect("Error fetching siblings");
        // Redelivery must not duplicate the sibling row, and the primary tender gets none.
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].0, 5_000);
        assert!(!siblings[0].1, "sibling rows are bookkeeping only");
    });
}

#[test]
fn notifications_for_foreign_or_unknown_payments_are_ignored() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;

        // Garbled merchant reference.
        let mut n = notification(&payment, "AUTHORISATION", "PSP-AUTH-1", 15_000);
        n.merchant_reference = "not-a-graph-id".to_string();
        flow.process_notification(&n).await.expect("Garbled reference must still be acknowledged");

        // A payment id we have never issued.
        let mut n = notification(&payment, "AUTHORISATION", "PSP-AUTH-2", 15_000);
        n.merchant_reference = base64::encode("Payment:999999");
        flow.process_notification(&n).await.expect("Unknown payment must still be acknowledged");

        assert_eq!(checkout.completions(), 0);
        assert_eq!(transaction_count(db.pool(), payment.id.0, "Auth").await, 0);
    });
}

#[test]
fn informational_and_unknown_event_codes_are_acknowledged() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let db = new_test_ledger().await;
        let checkout = MockCheckout::default();
        let processor = MockProcessor::default();
        let flow = api(&db, &checkout, &processor, false);
        let payment = seed_payment(&db, 15_000).await;

        for code in ["REPORT_AVAILABLE", "ORDER_OPENED", "SOMETHING_FROM_THE_FUTURE"] {
            let n = notification(&payment, code, "PSP-X", 0);
            flow.process_notification(&n).await.expect("Info codes must be acknowledged");
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(db.pool())
            .await
            .expect("Error counting transactions");
        assert_eq!(count, 0);
    });
}

//! Shared scaffolding for the reconciliation integration tests: a throwaway SQLite
//! ledger plus recording mocks for the checkout and processor collaborators.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use log::*;
use payment_recon_engine::{
    db_types::{Amount, NewPayment, Payment},
    notification::Notification,
    traits::{
        CheckoutError,
        CheckoutOps,
        CompletedOrder,
        LedgerDatabase,
        ProcessorClient,
        ProcessorError,
        ProcessorResponse,
    },
    SqliteDatabase,
};
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

pub const GATEWAY: &str = "acme_processor";

pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
    create_database(url).await;
    run_migrations(url).await;
}

pub fn random_db_path() -> String {
    format!("sqlite://../data/test_ledger_{}", rand::random::<u64>())
}

pub async fn run_migrations(url: &str) {
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Error creating connection to database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("Error running DB migrations");
    info!("🚀️ Migrations complete");
}

pub async fn create_database<P: AsRef<Path>>(path: P) {
    let p = path.as_ref().as_os_str().to_str().unwrap();
    if let Err(e) = Sqlite::drop_database(p).await {
        warn!("Error dropping database {p}: {e:?}");
    }
    Sqlite::create_database(p).await.expect("Error creating database");
    info!("Created Sqlite database {p}");
}

pub async fn new_test_ledger() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

pub async fn seed_payment(db: &SqliteDatabase, total: i64) -> Payment {
    let payment = NewPayment::new(GATEWAY, Amount::from(total), "EUR")
        .for_checkout("checkout-token-1")
        .with_return_url("https://store.test/return");
    db.insert_payment(payment).await.expect("Error seeding payment")
}

pub fn notification(payment: &Payment, event_code: &str, psp: &str, value: i64) -> Notification {
    let mut n = Notification::default();
    n.psp_reference = psp.to_string();
    n.merchant_account_code = "AcmeAccount".to_string();
    n.merchant_reference = payment.id.to_graph_id();
    n.event_code = event_code.to_string();
    n.success = "true".to_string();
    n.amount = Some(payment_amount(value));
    n
}

fn payment_amount(value: i64) -> payment_recon_engine::notification::NotificationAmount {
    let mut a = payment_recon_engine::notification::NotificationAmount::default();
    a.value = value;
    a.currency = "EUR".to_string();
    a
}

//--------------------------------------    MockCheckout      --------------------------------------------------------

#[derive(Debug, Default)]
pub struct CheckoutState {
    pub calls: Vec<String>,
    pub completions: u32,
    pub fail_completion: bool,
    pub transient_failures: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MockCheckout {
    state: Arc<Mutex<CheckoutState>>,
}

impl MockCheckout {
    pub fn failing_completion() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().fail_completion = true;
        mock
    }

    /// The first `n` completion attempts fail with a service error, as if the order
    /// service were briefly down; attempts after that succeed.
    pub fn with_transient_failures(n: u32) -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().transient_failures = n;
        mock
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn completions(&self) -> u32 {
        self.state.lock().unwrap().completions
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl CheckoutOps for MockCheckout {
    async fn complete_checkout(&self, payment: &Payment) -> Result<CompletedOrder, CheckoutError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_completion {
            state.calls.push(format!("complete_checkout({}) -> failed", payment.id));
            return Err(CheckoutError::CompletionFailed(payment.id, "out of stock".to_string()));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            state.calls.push(format!("complete_checkout({}) -> 503", payment.id));
            return Err(CheckoutError::ServiceError("order service returned 503".to_string()));
        }
        state.completions += 1;
        let order_reference = format!("ORD-{}", state.completions);
        state.calls.push(format!("complete_checkout({}) -> {order_reference}", payment.id));
        Ok(CompletedOrder { order_reference })
    }

    async fn order_authorized(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.record(format!("order_authorized({order_reference}, {amount})"));
        Ok(())
    }

    async fn order_captured(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.record(format!("order_captured({order_reference}, {amount})"));
        Ok(())
    }

    async fn order_refunded(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.record(format!("order_refunded({order_reference}, {amount})"));
        Ok(())
    }

    async fn cancel_order(&self, order_reference: &str) -> Result<(), CheckoutError> {
        self.record(format!("cancel_order({order_reference})"));
        Ok(())
    }

    async fn add_order_note(&self, order_reference: &str, note: &str) -> Result<(), CheckoutError> {
        self.record(format!("add_order_note({order_reference}, {note})"));
        Ok(())
    }
}

//--------------------------------------   MockProcessor      --------------------------------------------------------

#[derive(Debug, Default)]
pub struct ProcessorState {
    pub calls: Vec<String>,
    pub details_result_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockProcessor {
    state: Arc<Mutex<ProcessorState>>,
}

impl MockProcessor {
    pub fn with_details_result(code: &str) -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().details_result_code = Some(code.to_string());
        mock
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn response(&self, psp: &str, result_code: &str) -> ProcessorResponse {
        ProcessorResponse {
            psp_reference: psp.to_string(),
            result_code: result_code.to_string(),
            action: None,
            raw: serde_json::json!({"pspReference": psp, "resultCode": result_code}),
        }
    }
}

impl ProcessorClient for MockProcessor {
    async fn refund(
        &self,
        payment: &Payment,
        reference: &str,
        amount: Amount,
    ) -> Result<ProcessorResponse, ProcessorError> {
        self.state.lock().unwrap().calls.push(format!("refund({}, {reference}, {amount})", payment.id));
        Ok(self.response(&format!("{reference}-refund"), "[refund-received]"))
    }

    async fn void(&self, payment: &Payment, reference: &str) -> Result<ProcessorResponse, ProcessorError> {
        self.state.lock().unwrap().calls.push(format!("void({}, {reference})", payment.id));
        Ok(self.response(&format!("{reference}-void"), "[cancel-received]"))
    }

    async fn submit_additional_details(
        &self,
        payment_data: &str,
        details: &HashMap<String, String>,
    ) -> Result<ProcessorResponse, ProcessorError> {
        let mut keys = details.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        let code = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("submit_additional_details({payment_data}, [{}])", keys.join(", ")));
            state.details_result_code.clone().unwrap_or_else(|| "Authorised".to_string())
        };
        Ok(self.response("PSP-CONTINUATION", &code))
    }
}

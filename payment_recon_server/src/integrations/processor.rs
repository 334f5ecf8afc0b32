use std::{collections::HashMap, sync::Arc};

use log::*;
use payment_recon_engine::{
    db_types::{Amount, Payment},
    traits::{ProcessorClient, ProcessorError, ProcessorResponse},
};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde_json::{json, Value};

use crate::{config::ProcessorApiConfig, errors::ServerError};

/// REST client for the payment processor's modification API.
#[derive(Clone)]
pub struct ProcessorApi {
    config: ProcessorApiConfig,
    merchant_account: String,
    client: Arc<Client>,
}

impl ProcessorApi {
    pub fn new(config: ProcessorApiConfig, merchant_account: &str) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(config.api_key.reveal().as_str())
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        headers.insert("X-API-Key", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client =
            Client::builder().default_headers(headers).build().map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { config, merchant_account: merchant_account.to_string(), client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post(&self, path: &str, body: Value) -> Result<ProcessorResponse, ProcessorError> {
        let url = self.url(path);
        trace!("Sending processor request: {url}");
        let response = self.client.post(url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProcessorError::Timeout(e.to_string())
            } else {
                ProcessorError::RequestFailed(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Rejected { status: status.as_u16(), message });
        }
        let raw = response.json::<Value>().await.map_err(|e| ProcessorError::RequestFailed(e.to_string()))?;
        Ok(into_response(raw))
    }
}

/// Modification responses carry either a `resultCode` (payment continuations) or a
/// legacy `response` field (`[refund-received]` and friends).
fn into_response(raw: Value) -> ProcessorResponse {
    let psp_reference = raw["pspReference"].as_str().unwrap_or_default().to_string();
    let result_code = raw["resultCode"]
        .as_str()
        .or_else(|| raw["response"].as_str())
        .or_else(|| raw["status"].as_str())
        .unwrap_or_default()
        .to_string();
    let action = raw.get("action").filter(|a| !a.is_null()).cloned();
    ProcessorResponse { psp_reference, result_code, action, raw }
}

impl ProcessorClient for ProcessorApi {
    async fn refund(
        &self,
        payment: &Payment,
        reference: &str,
        amount: Amount,
    ) -> Result<ProcessorResponse, ProcessorError> {
        debug!("Requesting refund of {amount} {} against [{reference}]", payment.currency);
        let body = json!({
            "merchantAccount": self.merchant_account,
            "originalReference": reference,
            "modificationAmount": { "value": amount.value(), "currency": payment.currency },
        });
        self.post(&format!("/payments/{reference}/refunds"), body).await
    }

    async fn void(&self, payment: &Payment, reference: &str) -> Result<ProcessorResponse, ProcessorError> {
        debug!("Requesting void of [{reference}] for payment {}", payment.id);
        let body = json!({
            "merchantAccount": self.merchant_account,
            "originalReference": reference,
        });
        self.post(&format!("/payments/{reference}/cancels"), body).await
    }

    async fn submit_additional_details(
        &self,
        payment_data: &str,
        details: &HashMap<String, String>,
    ) -> Result<ProcessorResponse, ProcessorError> {
        let body = json!({
            "paymentData": payment_data,
            "details": details,
        });
        self.post("/payments/details", body).await
    }
}

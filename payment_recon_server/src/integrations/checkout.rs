use std::sync::Arc;

use log::*;
use payment_recon_engine::{
    db_types::{Amount, Payment},
    traits::{CheckoutError, CheckoutOps, CompletedOrder},
};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    StatusCode,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{config::CheckoutApiConfig, errors::ServerError};

/// REST client for the checkout/order service. The reconciler never interprets order
/// state; it only completes checkouts and reports payment events.
#[derive(Clone)]
pub struct CheckoutApi {
    config: CheckoutApiConfig,
    client: Arc<Client>,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(rename = "orderReference")]
    order_reference: String,
}

impl CheckoutApi {
    pub fn new(config: CheckoutApiConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(&format!("Bearer {}", config.access_token.reveal()))
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client =
            Client::builder().default_headers(headers).build().map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response, CheckoutError> {
        let url = self.url(path);
        trace!("Sending checkout service request: {url}");
        let response =
            self.client.post(url).json(&body).send().await.map_err(|e| CheckoutError::ServiceError(e.to_string()))?;
        Ok(response)
    }

    async fn order_event(&self, order_reference: &str, event: &str, amount: Amount) -> Result<(), CheckoutError> {
        let body = json!({ "event": event, "amount": amount.to_major_string() });
        let response = self.post(&format!("/orders/{order_reference}/payment-events"), body).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            Err(CheckoutError::ServiceError(format!("{event} event rejected ({status}): {message}")))
        }
    }
}

impl CheckoutOps for CheckoutApi {
    async fn complete_checkout(&self, payment: &Payment) -> Result<CompletedOrder, CheckoutError> {
        let token = payment.checkout_token.as_deref().ok_or(CheckoutError::CheckoutNotFound(payment.id))?;
        let body = json!({ "payment": payment.id.to_graph_id() });
        let response = self.post(&format!("/checkouts/{token}/complete"), body).await?;
        let status = response.status();
        if status.is_success() {
            let body =
                response.json::<CompletionBody>().await.map_err(|e| CheckoutError::ServiceError(e.to_string()))?;
            Ok(CompletedOrder { order_reference: body.order_reference })
        } else if status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT {
            // The checkout is no longer completable (line unavailable, voucher expired).
            let message = response.text().await.unwrap_or_default();
            Err(CheckoutError::CompletionFailed(payment.id, message))
        } else if status == StatusCode::NOT_FOUND {
            Err(CheckoutError::CheckoutNotFound(payment.id))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(CheckoutError::ServiceError(format!("checkout completion failed ({status}): {message}")))
        }
    }

    async fn order_authorized(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.order_event(order_reference, "authorized", amount).await
    }

    async fn order_captured(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.order_event(order_reference, "captured", amount).await
    }

    async fn order_refunded(&self, order_reference: &str, amount: Amount) -> Result<(), CheckoutError> {
        self.order_event(order_reference, "refunded", amount).await
    }

    async fn cancel_order(&self, order_reference: &str) -> Result<(), CheckoutError> {
        let response = self.post(&format!("/orders/{order_reference}/cancel"), json!({})).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            Err(CheckoutError::ServiceError(format!("order cancellation rejected ({status}): {message}")))
        }
    }

    async fn add_order_note(&self, order_reference: &str, note: &str) -> Result<(), CheckoutError> {
        let response = self.post(&format!("/orders/{order_reference}/notes"), json!({ "message": note })).await?;
        if !response.status().is_success() {
            debug!("Order note for {order_reference} was rejected with {}", response.status());
        }
        Ok(())
    }
}

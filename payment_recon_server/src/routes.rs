//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two
//! MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! The webhook contract: the processor keeps redelivering a notification until it gets a
//! 200 `[accepted]` back, so every outcome except a signature or credential failure is
//! acknowledged, including malformed bodies and internal reconciliation errors (which are
//! logged and resolved by the next redelivery or by manual reconciliation).

use std::collections::HashMap;

use actix_web::{get, http::header, web, HttpRequest, HttpResponse, Responder};
use log::*;
use payment_recon_engine::{
    notification::WebhookBody,
    traits::{CheckoutOps, LedgerDatabase, ProcessorClient},
    ConfirmationApi,
    ConfirmationRedirect,
    WebhookFlowApi,
};

use crate::{
    errors::ServerError,
    validator::{Origin, WebhookValidator},
};

#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

fn accepted() -> HttpResponse {
    HttpResponse::Ok().body("[accepted]")
}

/// `POST /webhooks`. One body can carry several notification items; each is validated
/// and reconciled independently.
pub async fn webhook<B, C, P>(
    req: HttpRequest,
    body: web::Bytes,
    validator: web::Data<WebhookValidator>,
    flow: web::Data<WebhookFlowApi<B, C, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerDatabase + 'static,
    C: CheckoutOps + 'static,
    P: ProcessorClient + 'static,
{
    let auth_header = req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    validator.validate_basic_auth(auth_header).map_err(|e| {
        warn!("🛍️ Rejecting webhook call. {e}");
        ServerError::AuthenticationFailed
    })?;
    let body: WebhookBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            warn!("🛍️ Discarding malformed webhook body. {e}");
            return Ok(accepted());
        },
    };
    for n in body.into_notifications() {
        if validator.check_origin(&n) == Origin::NotOurs {
            info!(
                "🛍️ Notification [{}] is addressed to merchant account {}, which is not ours. Ignoring.",
                n.psp_reference, n.merchant_account_code
            );
            continue;
        }
        validator.validate_signature(&n).map_err(|_| ServerError::InvalidSignature)?;
        if let Err(e) = flow.process_notification(&n).await {
            error!("🛍️ Could not reconcile notification [{}]. {e}", n.psp_reference);
        }
    }
    Ok(accepted())
}

/// `GET|POST /additional-actions?payment=<id>&checkout=<token>`. The customer lands here
/// after completing a processor challenge; on success they are redirected back to the
/// storefront's return URL.
pub async fn additional_action<B, C, P>(
    query: web::Query<HashMap<String, String>>,
    api: web::Data<ConfirmationApi<B, C, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerDatabase + 'static,
    C: CheckoutOps + 'static,
    P: ProcessorClient + 'static,
{
    let params = query.into_inner();
    let payment = params
        .get("payment")
        .cloned()
        .ok_or_else(|| ServerError::NoRecordFound("No payment was supplied".to_string()))?;
    let checkout = params
        .get("checkout")
        .cloned()
        .ok_or_else(|| ServerError::NoRecordFound("No checkout was supplied".to_string()))?;
    let redirect = api.confirm_returned_customer(&payment, &checkout, &params).await?;
    let location = redirect_url(&redirect);
    debug!("💳️ Redirecting returned customer to {location}");
    Ok(HttpResponse::Found().insert_header((header::LOCATION, location)).finish())
}

fn redirect_url(redirect: &ConfirmationRedirect) -> String {
    let query = redirect
        .params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if redirect.return_url.contains('?') { '&' } else { '?' };
    format!("{}{separator}{query}", redirect.return_url)
}

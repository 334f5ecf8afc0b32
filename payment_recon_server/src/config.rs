use std::env;

use log::*;
use prg_common::{parse_boolean_flag, Secret};

const DEFAULT_PRG_HOST: &str = "127.0.0.1";
const DEFAULT_PRG_PORT: u16 = 8360;
const DEFAULT_GATEWAY_ID: &str = "card_gateway";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub gateway: GatewayConfig,
    pub processor: ProcessorApiConfig,
    pub checkout: CheckoutApiConfig,
}

/// Per-gateway-instance settings: how incoming webhooks are authenticated and how the
/// reconciler treats authorisations.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// The identifier payments carry in their `gateway` column. Notifications addressed
    /// to payments of a different gateway are acknowledged and ignored.
    pub gateway_id: String,
    /// The merchant account this instance serves. Notifications for other accounts are
    /// acknowledged with a no-op.
    pub merchant_account: String,
    /// HMAC key for notification signatures. When unset, unsigned notifications pass and
    /// signed ones are rejected.
    pub hmac_key: Option<Secret<String>>,
    /// Basic-auth username for the webhook endpoint. When unset, no credential is
    /// required.
    pub webhook_username: Option<String>,
    /// SHA-256 hex digest of the basic-auth password.
    pub webhook_password_hash: Option<Secret<String>>,
    /// When true, a successful AUTHORISATION is booked as a capture directly.
    pub auto_capture: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProcessorApiConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CheckoutApiConfig {
    pub base_url: String,
    pub access_token: Secret<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PRG_HOST.to_string(),
            port: DEFAULT_PRG_PORT,
            database_url: String::default(),
            gateway: GatewayConfig::default(),
            processor: ProcessorApiConfig::default(),
            checkout: CheckoutApiConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PRG_HOST").ok().unwrap_or_else(|| DEFAULT_PRG_HOST.into());
        let port = env::var("PRG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for PRG_PORT. {e} Using the default, {DEFAULT_PRG_PORT}, instead."
                    );
                    DEFAULT_PRG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PRG_PORT);
        let database_url = env::var("PRG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PRG_DATABASE_URL is not set. Please set it to the URL for the ledger database.");
            String::default()
        });
        let gateway = GatewayConfig::from_env_or_default();
        let processor = ProcessorApiConfig::from_env_or_default();
        let checkout = CheckoutApiConfig::from_env_or_default();
        Self { host, port, database_url, gateway, processor, checkout }
    }
}

impl GatewayConfig {
    pub fn from_env_or_default() -> Self {
        let gateway_id = env::var("PRG_GATEWAY_ID").ok().unwrap_or_else(|| {
            info!("🪛️ PRG_GATEWAY_ID is not set. Using the default, {DEFAULT_GATEWAY_ID}.");
            DEFAULT_GATEWAY_ID.into()
        });
        let merchant_account = env::var("PRG_MERCHANT_ACCOUNT").ok().unwrap_or_else(|| {
            error!(
                "🪛️ PRG_MERCHANT_ACCOUNT is not set. Notifications cannot be matched to this instance without it."
            );
            String::default()
        });
        let hmac_key = env::var("PRG_HMAC_KEY").ok().map(Secret::new);
        if hmac_key.is_none() {
            warn!(
                "🪛️ PRG_HMAC_KEY is not set. Webhook signatures will not be checked, and signed notifications will \
                 be rejected."
            );
        }
        let webhook_username = env::var("PRG_WEBHOOK_USER").ok();
        let webhook_password_hash = env::var("PRG_WEBHOOK_PASSWORD_HASH").ok().map(Secret::new);
        if webhook_username.is_some() && webhook_password_hash.is_none() {
            warn!(
                "🪛️ PRG_WEBHOOK_USER is set, but PRG_WEBHOOK_PASSWORD_HASH is not. All webhook credentials will be \
                 rejected."
            );
        }
        if webhook_username.is_none() {
            info!("🪛️ PRG_WEBHOOK_USER is not set. The webhook endpoint will not require credentials.");
        }
        let auto_capture = parse_boolean_flag(env::var("PRG_AUTO_CAPTURE").ok(), false);
        info!("🪛️ Auto-capture is {}", if auto_capture { "enabled" } else { "disabled" });
        Self { gateway_id, merchant_account, hmac_key, webhook_username, webhook_password_hash, auto_capture }
    }
}

impl ProcessorApiConfig {
    pub fn from_env_or_default() -> Self {
        let base_url = env::var("PRG_PROCESSOR_API_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PRG_PROCESSOR_API_URL is not set. Refunds, voids and continuations will fail.");
            String::default()
        });
        let api_key = env::var("PRG_PROCESSOR_API_KEY").ok().map(Secret::new).unwrap_or_else(|| {
            error!("🪛️ PRG_PROCESSOR_API_KEY is not set. Please set it to the processor API key.");
            Secret::default()
        });
        Self { base_url, api_key }
    }
}

impl CheckoutApiConfig {
    pub fn from_env_or_default() -> Self {
        let base_url = env::var("PRG_CHECKOUT_API_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PRG_CHECKOUT_API_URL is not set. Order creation will fail.");
            String::default()
        });
        let access_token = env::var("PRG_CHECKOUT_API_TOKEN").ok().map(Secret::new).unwrap_or_else(|| {
            error!("🪛️ PRG_CHECKOUT_API_TOKEN is not set. Please set it to the checkout service access token.");
            Secret::default()
        });
        Self { base_url, access_token }
    }
}

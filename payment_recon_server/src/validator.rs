//! Signature and origin validation for incoming webhook notifications.
//!
//! Three independent checks, all pure:
//! * basic-auth credentials on the HTTP request;
//! * the per-item HMAC signature carried in `additionalData["hmacSignature"]`;
//! * the merchant account the notification is addressed to.
//!
//! The caller decides the HTTP response: signature and credential failures are 400s,
//! a merchant-account mismatch is acknowledged and dropped.

use base64::encode as base64_encode;
use hmac::{Hmac, Mac};
use log::*;
use payment_recon_engine::notification::Notification;
use prg_common::Secret;
use sha2::{Digest, Sha256};

use crate::config::GatewayConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Ours,
    NotOurs,
}

#[derive(Clone)]
pub struct WebhookValidator {
    merchant_account: String,
    hmac_key: Option<Secret<String>>,
    username: Option<String>,
    password_hash: Option<Secret<String>>,
}

impl WebhookValidator {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            merchant_account: config.merchant_account.clone(),
            hmac_key: config.hmac_key.clone(),
            username: config.webhook_username.clone(),
            password_hash: config.webhook_password_hash.clone(),
        }
    }

    /// Is the notification addressed to the merchant account this instance serves?
    pub fn check_origin(&self, n: &Notification) -> Origin {
        if n.merchant_account_code == self.merchant_account {
            Origin::Ours
        } else {
            Origin::NotOurs
        }
    }

    /// The signature law: accept iff neither a key nor a signature is present, or both
    /// are present and the computed HMAC matches. Exactly one of the two present is a
    /// rejection.
    pub fn validate_signature(&self, n: &Notification) -> Result<(), ValidationError> {
        let provided = n.additional_str("hmacSignature");
        match (&self.hmac_key, provided) {
            (None, None) => Ok(()),
            (None, Some(_)) => {
                warn!("🔐️ Notification [{}] is signed, but no HMAC key is configured", n.psp_reference);
                Err(ValidationError::SignatureMismatch)
            },
            (Some(_), None) => {
                warn!("🔐️ Notification [{}] carries no signature", n.psp_reference);
                Err(ValidationError::SignatureMismatch)
            },
            (Some(key), Some(provided)) => {
                let computed = calculate_hmac(key.reveal(), &signed_payload(n));
                if computed == provided {
                    Ok(())
                } else {
                    warn!("🔐️ Notification [{}] failed the HMAC check", n.psp_reference);
                    Err(ValidationError::SignatureMismatch)
                }
            },
        }
    }

    /// Checks the `Authorization: Basic` header against the configured username and
    /// password hash. With no username configured, any (or no) credential passes.
    pub fn validate_basic_auth(&self, auth_header: Option<&str>) -> Result<(), ValidationError> {
        let expected_user = match &self.username {
            Some(user) => user,
            None => return Ok(()),
        };
        let header = auth_header.ok_or(ValidationError::MissingCredentials)?;
        let encoded = header.strip_prefix("Basic ").ok_or(ValidationError::MissingCredentials)?;
        let decoded = base64::decode(encoded.trim()).map_err(|_| ValidationError::BadCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| ValidationError::BadCredentials)?;
        let (user, password) = decoded.split_once(':').ok_or(ValidationError::BadCredentials)?;
        if user != expected_user {
            return Err(ValidationError::BadCredentials);
        }
        let expected_hash = self.password_hash.as_ref().ok_or(ValidationError::BadCredentials)?;
        let digest = Sha256::digest(password.as_bytes());
        let digest = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        if digest.eq_ignore_ascii_case(expected_hash.reveal()) {
            Ok(())
        } else {
            Err(ValidationError::BadCredentials)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("The notification signature does not match")]
    SignatureMismatch,
    #[error("No webhook credentials were supplied")]
    MissingCredentials,
    #[error("The webhook credentials are invalid")]
    BadCredentials,
}

/// The fixed, ordered, colon-joined field list the processor signs. Absent fields render
/// as the empty string; `success` is passed through verbatim.
pub fn signed_payload(n: &Notification) -> String {
    let amount_value = n.amount.as_ref().map(|a| a.value.to_string()).unwrap_or_default();
    let amount_currency = n.amount.as_ref().map(|a| a.currency.clone()).unwrap_or_default();
    [
        n.psp_reference.as_str(),
        n.original_reference.as_deref().unwrap_or(""),
        n.merchant_account_code.as_str(),
        n.merchant_reference.as_str(),
        amount_value.as_str(),
        amount_currency.as_str(),
        n.event_code.as_str(),
        n.success.as_str(),
    ]
    .join(":")
}

pub fn calculate_hmac(key: &str, payload: &str) -> String {
    // HMAC can take a key of any size; new_from_slice never fails for Hmac.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap_or_else(|_| HmacSha256::new_from_slice(b"").unwrap());
    mac.update(payload.as_bytes());
    base64_encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod test {
    use payment_recon_engine::notification::NotificationAmount;

    use super::*;

    const KEY: &str = "0123456789abcdef";

    fn config(hmac_key: Option<&str>, user: Option<&str>, password_hash: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            gateway_id: "card_gateway".to_string(),
            merchant_account: "AcmeAccount".to_string(),
            hmac_key: hmac_key.map(|k| Secret::new(k.to_string())),
            webhook_username: user.map(String::from),
            webhook_password_hash: password_hash.map(|h| Secret::new(h.to_string())),
            auto_capture: false,
        }
    }

    fn sample_notification() -> Notification {
        let mut n = Notification::default();
        n.psp_reference = "PSP1".to_string();
        n.merchant_account_code = "AcmeAccount".to_string();
        n.merchant_reference = "UGF5bWVudDo3".to_string();
        n.event_code = "AUTHORISATION".to_string();
        n.success = "true".to_string();
        n.amount = Some(NotificationAmount { value: 15_000, currency: "EUR".to_string() });
        n
    }

    fn sign(n: &mut Notification, key: &str) {
        let sig = calculate_hmac(key, &signed_payload(n));
        n.additional_data.insert("hmacSignature".to_string(), serde_json::json!(sig));
    }

    #[test]
    fn signed_payload_is_the_ordered_field_list() {
        let n = sample_notification();
        assert_eq!(signed_payload(&n), "PSP1::AcmeAccount:UGF5bWVudDo3:15000:EUR:AUTHORISATION:true");
    }

    #[test]
    fn signature_law() {
        let validator = WebhookValidator::new(&config(Some(KEY), None, None));
        let unkeyed = WebhookValidator::new(&config(None, None, None));
        let mut n = sample_notification();

        // Key configured, no signature: reject.
        assert!(validator.validate_signature(&n).is_err());
        // No key, no signature: accept.
        assert!(unkeyed.validate_signature(&n).is_ok());

        sign(&mut n, KEY);
        // Key and matching signature: accept.
        assert!(validator.validate_signature(&n).is_ok());
        // Signature present, no key configured: reject.
        assert!(unkeyed.validate_signature(&n).is_err());
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let validator = WebhookValidator::new(&config(Some(KEY), None, None));
        let mut n = sample_notification();
        sign(&mut n, KEY);
        n.amount = Some(NotificationAmount { value: 1, currency: "EUR".to_string() });
        assert_eq!(validator.validate_signature(&n), Err(ValidationError::SignatureMismatch));

        let mut n = sample_notification();
        sign(&mut n, "another-key");
        assert_eq!(validator.validate_signature(&n), Err(ValidationError::SignatureMismatch));
    }

    #[test]
    fn basic_auth_checks_the_password_hash() {
        // SHA-256("hunter2")
        let hash = "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";
        let validator = WebhookValidator::new(&config(None, Some("notify"), Some(hash)));
        let header = format!("Basic {}", base64::encode("notify:hunter2"));
        assert!(validator.validate_basic_auth(Some(&header)).is_ok());

        let wrong_pass = format!("Basic {}", base64::encode("notify:hunter3"));
        assert_eq!(validator.validate_basic_auth(Some(&wrong_pass)), Err(ValidationError::BadCredentials));
        let wrong_user = format!("Basic {}", base64::encode("other:hunter2"));
        assert_eq!(validator.validate_basic_auth(Some(&wrong_user)), Err(ValidationError::BadCredentials));
        assert_eq!(validator.validate_basic_auth(None), Err(ValidationError::MissingCredentials));
        assert_eq!(validator.validate_basic_auth(Some("Bearer xyz")), Err(ValidationError::MissingCredentials));
    }

    #[test]
    fn without_a_username_any_credential_passes() {
        let validator = WebhookValidator::new(&config(None, None, None));
        assert!(validator.validate_basic_auth(None).is_ok());
        assert!(validator.validate_basic_auth(Some("Basic !!!")).is_ok());
    }

    #[test]
    fn origin_check() {
        let validator = WebhookValidator::new(&config(None, None, None));
        let mut n = sample_notification();
        assert_eq!(validator.check_origin(&n), Origin::Ours);
        n.merchant_account_code = "SomeoneElse".to_string();
        assert_eq!(validator.check_origin(&n), Origin::NotOurs);
    }
}

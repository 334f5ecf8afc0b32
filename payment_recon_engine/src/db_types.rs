use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

pub use prg_common::Amount;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------      PaymentId       --------------------------------------------------------
/// The internal id of a payment row. Externally, payments are addressed by the graph-encoded
/// form `base64("Payment:<id>")`, which is what the processor echoes back as the merchant
/// reference on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type)]
#[sqlx(transparent)]
pub struct PaymentId(pub i64);

impl PaymentId {
    pub fn to_graph_id(self) -> String {
        base64::encode(format!("Payment:{}", self.0))
    }

    pub fn from_graph_id(s: &str) -> Result<Self, ConversionError> {
        let raw = base64::decode(s).map_err(|e| ConversionError(format!("Invalid graph id: {e}")))?;
        let raw = String::from_utf8(raw).map_err(|e| ConversionError(format!("Invalid graph id: {e}")))?;
        let id = raw
            .strip_prefix("Payment:")
            .ok_or_else(|| ConversionError(format!("Not a payment graph id: {raw}")))?;
        let id = id.parse::<i64>().map_err(|e| ConversionError(format!("Invalid payment id: {e}")))?;
        Ok(Self(id))
    }
}

impl Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for PaymentId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

//--------------------------------------   TransactionKind    --------------------------------------------------------
/// The kind of a ledger transaction. There is no single state machine over these; each
/// event handler inspects the transaction history to decide what is valid next, because
/// the processor, not this system, is authoritative for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type)]
pub enum TransactionKind {
    Auth,
    Pending,
    ActionToConfirm,
    Capture,
    CaptureFailed,
    Void,
    Refund,
    RefundOngoing,
    RefundFailed,
    RefundReversed,
    Cancel,
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionKind::Auth => "Auth",
            TransactionKind::Pending => "Pending",
            TransactionKind::ActionToConfirm => "ActionToConfirm",
            TransactionKind::Capture => "Capture",
            TransactionKind::CaptureFailed => "CaptureFailed",
            TransactionKind::Void => "Void",
            TransactionKind::Refund => "Refund",
            TransactionKind::RefundOngoing => "RefundOngoing",
            TransactionKind::RefundFailed => "RefundFailed",
            TransactionKind::RefundReversed => "RefundReversed",
            TransactionKind::Cancel => "Cancel",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TransactionKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Auth" => Ok(Self::Auth),
            "Pending" => Ok(Self::Pending),
            "ActionToConfirm" => Ok(Self::ActionToConfirm),
            "Capture" => Ok(Self::Capture),
            "CaptureFailed" => Ok(Self::CaptureFailed),
            "Void" => Ok(Self::Void),
            "Refund" => Ok(Self::Refund),
            "RefundOngoing" => Ok(Self::RefundOngoing),
            "RefundFailed" => Ok(Self::RefundFailed),
            "RefundReversed" => Ok(Self::RefundReversed),
            "Cancel" => Ok(Self::Cancel),
            s => Err(ConversionError(format!("Invalid transaction kind: {s}"))),
        }
    }
}

impl From<String> for TransactionKind {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid transaction kind in database: {value}. Defaulting to Pending");
            TransactionKind::Pending
        })
    }
}

//--------------------------------------    ChargeStatus      --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type)]
pub enum ChargeStatus {
    NotCharged,
    Pending,
    PartiallyCharged,
    FullyCharged,
    PartiallyRefunded,
    FullyRefunded,
    Refused,
    Cancelled,
}

impl ChargeStatus {
    /// Derives the charge status from the ledger aggregates. `captured` is the net of
    /// successful captures minus successful refunds; `refunded` is the refund total that
    /// actually moved money.
    pub fn derive(total: Amount, captured: Amount, refunded: Amount) -> Self {
        if refunded.is_positive() {
            if captured.is_positive() {
                ChargeStatus::PartiallyRefunded
            } else {
                ChargeStatus::FullyRefunded
            }
        } else if !captured.is_positive() {
            ChargeStatus::NotCharged
        } else if captured < total {
            ChargeStatus::PartiallyCharged
        } else {
            ChargeStatus::FullyCharged
        }
    }

    /// Statuses from which an order may still be materialized.
    pub fn can_create_order(&self) -> bool {
        matches!(
            self,
            ChargeStatus::NotCharged |
                ChargeStatus::Pending |
                ChargeStatus::PartiallyCharged |
                ChargeStatus::FullyCharged
        )
    }
}

impl Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChargeStatus::NotCharged => "NotCharged",
            ChargeStatus::Pending => "Pending",
            ChargeStatus::PartiallyCharged => "PartiallyCharged",
            ChargeStatus::FullyCharged => "FullyCharged",
            ChargeStatus::PartiallyRefunded => "PartiallyRefunded",
            ChargeStatus::FullyRefunded => "FullyRefunded",
            ChargeStatus::Refused => "Refused",
            ChargeStatus::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ChargeStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotCharged" => Ok(Self::NotCharged),
            "Pending" => Ok(Self::Pending),
            "PartiallyCharged" => Ok(Self::PartiallyCharged),
            "FullyCharged" => Ok(Self::FullyCharged),
            "PartiallyRefunded" => Ok(Self::PartiallyRefunded),
            "FullyRefunded" => Ok(Self::FullyRefunded),
            "Refused" => Ok(Self::Refused),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid charge status: {s}"))),
        }
    }
}

impl From<String> for ChargeStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid charge status in database: {value}. Defaulting to NotCharged");
            ChargeStatus::NotCharged
        })
    }
}

//--------------------------------------    PendingAction     --------------------------------------------------------
/// The queued continuation request stored on a payment while the customer completes an
/// additional action (3-D-Secure challenge and friends). Stored as JSON on the payment
/// row and validated when read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Opaque continuation blob the processor expects back verbatim.
    pub payment_data: String,
    /// Names of the request parameters the processor expects to be echoed on return.
    pub expected_params: Vec<String>,
}

impl PendingAction {
    pub fn from_json_str(s: &str) -> Result<Self, ConversionError> {
        serde_json::from_str(s).map_err(|e| ConversionError(format!("Invalid pending action data: {e}")))
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

//--------------------------------------       Payment        --------------------------------------------------------
/// One payment attempt for a checkout. The `checkout_token` reference is cleared and
/// `order_reference` set exactly once, at order-creation time. Rows are never deleted;
/// they are soft-deactivated via `is_active`.
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: PaymentId,
    pub gateway: String,
    pub is_active: bool,
    pub charge_status: ChargeStatus,
    pub total: Amount,
    pub currency: String,
    pub checkout_token: Option<String>,
    pub order_reference: Option<String>,
    pub return_url: Option<String>,
    pub partial: bool,
    pub psp_reference: Option<String>,
    pub pending_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn has_order(&self) -> bool {
        self.order_reference.is_some()
    }

    /// Returns the typed pending action, if one is stored and valid.
    pub fn pending_action(&self) -> Result<Option<PendingAction>, ConversionError> {
        match &self.pending_action {
            Some(raw) => PendingAction::from_json_str(raw).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub gateway: String,
    pub total: Amount,
    pub currency: String,
    pub checkout_token: Option<String>,
    pub return_url: Option<String>,
    pub partial: bool,
    pub is_active: bool,
    pub psp_reference: Option<String>,
}

impl NewPayment {
    pub fn new(gateway: impl Into<String>, total: Amount, currency: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            total,
            currency: currency.into(),
            checkout_token: None,
            return_url: None,
            partial: false,
            is_active: true,
            psp_reference: None,
        }
    }

    pub fn for_checkout(mut self, token: impl Into<String>) -> Self {
        self.checkout_token = Some(token.into());
        self
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self {
        self.return_url = Some(url.into());
        self
    }

    /// Marks this payment as a partial-tender sibling: bookkeeping only, never active.
    pub fn as_partial_sibling(mut self, psp_reference: impl Into<String>) -> Self {
        self.partial = true;
        self.is_active = false;
        self.psp_reference = Some(psp_reference.into());
        self
    }
}

//--------------------------------------     Transaction      --------------------------------------------------------
/// Append-only event record for a payment. Never mutated after insert; never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub payment_id: PaymentId,
    pub kind: TransactionKind,
    /// The processor's reference for the operation. This is the idempotency key.
    pub token: String,
    pub is_success: bool,
    pub action_required: bool,
    pub amount: Amount,
    pub currency: String,
    pub gateway_response: String,
    pub action_required_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub token: String,
    pub is_success: bool,
    pub action_required: bool,
    pub amount: Amount,
    pub currency: String,
    pub gateway_response: serde_json::Value,
    pub action_required_data: Option<serde_json::Value>,
}

impl NewTransaction {
    pub fn new(kind: TransactionKind, token: impl Into<String>, amount: Amount, currency: impl Into<String>) -> Self {
        Self {
            kind,
            token: token.into(),
            is_success: true,
            action_required: false,
            amount,
            currency: currency.into(),
            gateway_response: serde_json::Value::Null,
            action_required_data: None,
        }
    }

    pub fn failed(mut self) -> Self {
        self.is_success = false;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.is_success = success;
        self
    }

    pub fn requires_action(mut self, data: Option<serde_json::Value>) -> Self {
        self.action_required = true;
        self.action_required_data = data;
        self
    }

    pub fn with_gateway_response(mut self, response: serde_json::Value) -> Self {
        self.gateway_response = response;
        self
    }
}

/// The result of an idempotent ledger insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The transaction was inserted; this delivery is the first of its `(kind, token)`.
    Inserted(Transaction),
    /// A successful transaction with the same `(kind, token)` already exists.
    Duplicate(Transaction),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            InsertOutcome::Inserted(tx) | InsertOutcome::Duplicate(tx) => tx,
        }
    }
}

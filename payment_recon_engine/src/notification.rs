//! Wire types for processor webhook notifications.
//!
//! The processor delivers a JSON body with a `notificationItems` array; each element wraps
//! a single `NotificationRequestItem`. Event codes are modelled as an enum so that the
//! dispatch in the reconciler is an exhaustive match rather than a dictionary lookup.

use serde::Deserialize;
use serde_json::Value;

use crate::db_types::Amount;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookBody {
    pub notification_items: Vec<NotificationItem>,
}

impl WebhookBody {
    pub fn into_notifications(self) -> Vec<Notification> {
        self.notification_items.into_iter().map(|i| i.notification_request_item).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationItem {
    #[serde(rename = "NotificationRequestItem", default)]
    pub notification_request_item: Notification,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    pub psp_reference: String,
    pub original_reference: Option<String>,
    pub merchant_account_code: String,
    /// The graph-encoded payment id this gateway supplied when the payment was initiated.
    pub merchant_reference: String,
    pub amount: Option<NotificationAmount>,
    pub event_code: String,
    /// Literal `"true"` or `"false"` on the wire.
    pub success: String,
    pub reason: Option<String>,
    pub additional_data: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationAmount {
    /// Minor units.
    pub value: i64,
    pub currency: String,
}

impl Notification {
    pub fn is_success(&self) -> bool {
        self.success == "true"
    }

    pub fn event(&self) -> EventCode {
        self.event_code.parse().unwrap_or_else(|_| EventCode::Unknown(self.event_code.clone()))
    }

    pub fn amount_value(&self) -> Amount {
        self.amount.as_ref().map(|a| Amount::from(a.value)).unwrap_or(Amount::ZERO)
    }

    pub fn currency(&self) -> &str {
        self.amount.as_ref().map(|a| a.currency.as_str()).unwrap_or("")
    }

    pub fn additional_str(&self, key: &str) -> Option<&str> {
        self.additional_data.get(key).and_then(|v| v.as_str())
    }

    /// For CANCEL_OR_REFUND notifications the processor reports which modification it
    /// actually performed in `additionalData["modification.action"]`.
    pub fn modification_action(&self) -> Option<&str> {
        self.additional_str("modification.action")
    }

    /// The notification payload as recorded on the ledger.
    pub fn to_gateway_response(&self) -> Value {
        serde_json::json!({
            "pspReference": self.psp_reference,
            "eventCode": self.event_code,
            "success": self.success,
            "reason": self.reason,
            "merchantReference": self.merchant_reference,
        })
    }
}

//--------------------------------------      EventCode       --------------------------------------------------------
/// Every event code this gateway understands. Unmatched codes carry their raw string so
/// the router can acknowledge them with a logged no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCode {
    Authorisation,
    AuthorisationAdjustment,
    Cancellation,
    CancelOrRefund,
    Capture,
    CaptureFailed,
    HandledExternally,
    OrderOpened,
    OrderClosed,
    Pending,
    ProcessRetry,
    Refund,
    RefundFailed,
    RefundedReversed,
    RefundWithData,
    ReportAvailable,
    Unknown(String),
}

impl std::str::FromStr for EventCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s {
            "AUTHORISATION" => Self::Authorisation,
            "AUTHORISATION_ADJUSTMENT" => Self::AuthorisationAdjustment,
            "CANCELLATION" => Self::Cancellation,
            "CANCEL_OR_REFUND" => Self::CancelOrRefund,
            "CAPTURE" => Self::Capture,
            "CAPTURE_FAILED" => Self::CaptureFailed,
            "HANDLED_EXTERNALLY" => Self::HandledExternally,
            "ORDER_OPENED" => Self::OrderOpened,
            "ORDER_CLOSED" => Self::OrderClosed,
            "PENDING" => Self::Pending,
            "PROCESS_RETRY" => Self::ProcessRetry,
            "REFUND" => Self::Refund,
            "REFUND_FAILED" => Self::RefundFailed,
            "REFUNDED_REVERSED" => Self::RefundedReversed,
            "REFUND_WITH_DATA" => Self::RefundWithData,
            "REPORT_AVAILABLE" => Self::ReportAvailable,
            other => Self::Unknown(other.to_string()),
        };
        Ok(code)
    }
}

impl std::fmt::Display for EventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authorisation => "AUTHORISATION",
            Self::AuthorisationAdjustment => "AUTHORISATION_ADJUSTMENT",
            Self::Cancellation => "CANCELLATION",
            Self::CancelOrRefund => "CANCEL_OR_REFUND",
            Self::Capture => "CAPTURE",
            Self::CaptureFailed => "CAPTURE_FAILED",
            Self::HandledExternally => "HANDLED_EXTERNALLY",
            Self::OrderOpened => "ORDER_OPENED",
            Self::OrderClosed => "ORDER_CLOSED",
            Self::Pending => "PENDING",
            Self::ProcessRetry => "PROCESS_RETRY",
            Self::Refund => "REFUND",
            Self::RefundFailed => "REFUND_FAILED",
            Self::RefundedReversed => "REFUNDED_REVERSED",
            Self::RefundWithData => "REFUND_WITH_DATA",
            Self::ReportAvailable => "REPORT_AVAILABLE",
            Self::Unknown(s) => s.as_str(),
        };
        write!(f, "{s}")
    }
}

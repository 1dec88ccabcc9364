use crate::phone::PhoneNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of outbound send this was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCategory {
    Alert,
    Update,
    Prediction,
    Weather,
    General,
    PasswordReset,
    Test,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Update => "update",
            Self::Prediction => "prediction",
            Self::Weather => "weather",
            Self::General => "general",
            Self::PasswordReset => "password-reset",
            Self::Test => "test",
        }
    }
}

impl std::str::FromStr for MessageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(Self::Alert),
            "update" => Ok(Self::Update),
            "prediction" => Ok(Self::Prediction),
            "weather" => Ok(Self::Weather),
            "general" => Ok(Self::General),
            "password-reset" => Ok(Self::PasswordReset),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown message category '{other}'")),
        }
    }
}

/// Delivery lifecycle of an outbound message.
///
/// Transitions are monotonic: pending → sent → delivered, or
/// pending/sent → failed. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Whether this status is terminal (immutable thereafter).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// A logged outbound SMS. Created when a send is attempted; status mutated
/// only by the delivery reconciler; never deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub recipient: PhoneNumber,
    pub body: String,
    pub category: MessageCategory,
    pub status: DeliveryStatus,
    /// Vendor-assigned id, present once the gateway accepts the send.
    pub external_id: Option<String>,
    /// Sender/operator id the vendor routed through, if reported.
    pub sender_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// An inbound SMS from a farmer (or noise the classifier rejected).
/// The vendor message id is the idempotency key across both ingest paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub vendor_id: String,
    pub sender: PhoneNumber,
    pub body: String,
    /// Set by the classifier; rejected messages are logged but inert.
    pub accepted: bool,
    /// Best-effort link to the outbound message this replies to
    /// (most recent send to this phone within 24h).
    pub reply_to: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

/// Direction of a conversation touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Lifecycle stage reported by the vendor for a previously sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Sent,
    Delivered,
    Failed,
}

/// A delivery-status event from the vendor, to be reconciled against the
/// outbound log.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub external_id: Option<String>,
    pub recipient: Option<PhoneNumber>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

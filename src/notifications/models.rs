//! Notification data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boxes::BoxId;

/// Globally unique 128-bit notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn random() -> Self {
        NotificationId(Uuid::new_v4())
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NotificationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NotificationId(Uuid::parse_str(s)?))
    }
}

/// Media type of the published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContentType {
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "application/xml")]
    Xml,
}

impl MessageContentType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            MessageContentType::Json => "application/json",
            MessageContentType::Xml => "application/xml",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        // Ignore charset and other media type parameters
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            "application/json" => Some(MessageContentType::Json),
            "application/xml" => Some(MessageContentType::Xml),
            _ => None,
        }
    }
}

/// Delivery lifecycle state. `Acknowledged` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACKNOWLEDGED")]
    Acknowledged,
    #[serde(rename = "FAILED")]
    Failed,
}

impl NotificationStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Acknowledged => "ACKNOWLEDGED",
            NotificationStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(NotificationStatus::Pending),
            "ACKNOWLEDGED" => Some(NotificationStatus::Acknowledged),
            "FAILED" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Acknowledged | NotificationStatus::Failed
        )
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationStatus::from_db_str(s).ok_or(())
    }
}

/// A notification as seen by consumers and by the push envelope. The message
/// body is stored encrypted; this struct always carries plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "notificationId")]
    pub notification_id: NotificationId,
    #[serde(rename = "boxId")]
    pub box_id: BoxId,
    #[serde(rename = "messageContentType")]
    pub message_content_type: MessageContentType,
    pub message: String,
    pub status: NotificationStatus,
    #[serde(rename = "createdDateTime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "retryAfterDateTime", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(rename = "readDateTime", skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(rename = "pushedDateTime", skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<DateTime<Utc>>,
    /// Push attempts so far, drives the back-off schedule. Not part of the
    /// API representation.
    #[serde(skip)]
    pub retry_count: i32,
}

impl Notification {
    /// A freshly ingested notification: pending, eligible for push now.
    pub fn new(
        notification_id: NotificationId,
        box_id: BoxId,
        message_content_type: MessageContentType,
        message: String,
    ) -> Self {
        Self {
            notification_id,
            box_id,
            message_content_type,
            message,
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
            retry_after: None,
            read_at: None,
            pushed_at: None,
            retry_count: 0,
        }
    }
}

//! Boxes: named mailboxes owned by a client, the unit of subscription and
//! the destination of publishes.

mod store;

pub use store::{BoxStore, CreateBoxOutcome, UpdateSubscriberOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique 128-bit box identifier, server-assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(pub Uuid);

impl BoxId {
    pub fn random() -> Self {
        BoxId(Uuid::new_v4())
    }
}

impl std::fmt::Display for BoxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BoxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BoxId(Uuid::parse_str(s)?))
    }
}

/// Owner identity of a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxCreator {
    #[serde(rename = "clientId")]
    pub client_id: crate::clients::ClientId,
}

/// Consumer binding of a box. Exactly one subscriber at most: either push
/// (the hub calls out) or pull (the consumer polls).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subscriptionType")]
pub enum Subscriber {
    #[serde(rename = "API_PUSH_SUBSCRIBER")]
    Push {
        #[serde(rename = "callBackUrl")]
        callback_url: String,
        #[serde(rename = "subscribedDateTime")]
        subscribed_at: DateTime<Utc>,
    },
    #[serde(rename = "API_PULL_SUBSCRIBER")]
    Pull {
        #[serde(rename = "subscribedDateTime")]
        subscribed_at: DateTime<Utc>,
    },
}

/// A named mailbox. `box_name` is unique per owning client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBox {
    #[serde(rename = "boxId")]
    pub box_id: BoxId,
    #[serde(rename = "boxName")]
    pub box_name: String,
    #[serde(rename = "boxCreator")]
    pub box_creator: BoxCreator,
    #[serde(rename = "applicationId", skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<Subscriber>,
}

impl NotificationBox {
    /// The callback URL of a valid push subscriber: push-typed with a
    /// non-empty URL. A box without one behaves as pull-only.
    pub fn push_callback_url(&self) -> Option<&str> {
        match &self.subscriber {
            Some(Subscriber::Push { callback_url, .. }) if !callback_url.is_empty() => {
                Some(callback_url.as_str())
            }
            _ => None,
        }
    }

    /// Current callback URL regardless of validity, for change detection.
    pub fn current_callback_url(&self) -> Option<&str> {
        match &self.subscriber {
            Some(Subscriber::Push { callback_url, .. }) => Some(callback_url.as_str()),
            _ => None,
        }
    }
}

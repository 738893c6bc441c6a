//! Audit events emitted to the external application-events service.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boxes::{BoxId, NotificationBox};

/// Who performed the change. Callback updates arrive through a trusted
/// upstream that strips the caller identity, hence the UNKNOWN actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActor {
    pub id: String,
    #[serde(rename = "actorType")]
    pub actor_type: String,
}

/// Audit record for a box callback URL change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUriUpdatedEvent {
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    #[serde(rename = "applicationId")]
    pub application_id: Option<String>,
    #[serde(rename = "eventDateTime")]
    pub event_datetime: DateTime<Utc>,
    #[serde(rename = "oldCallbackUrl")]
    pub old_callback_url: String,
    #[serde(rename = "newCallbackUrl")]
    pub new_callback_url: String,
    #[serde(rename = "boxId")]
    pub box_id: BoxId,
    #[serde(rename = "boxName")]
    pub box_name: String,
    pub actor: EventActor,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

impl CallbackUriUpdatedEvent {
    pub fn new(notification_box: &NotificationBox, old_url: String, new_url: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            application_id: notification_box.application_id.clone(),
            event_datetime: Utc::now(),
            old_callback_url: old_url,
            new_callback_url: new_url,
            box_id: notification_box.box_id,
            box_name: notification_box.box_name.clone(),
            actor: EventActor {
                id: String::new(),
                actor_type: "UNKNOWN".to_string(),
            },
            event_type: "PPNS_CALLBACK_URI_UPDATED".to_string(),
        }
    }
}

/// Sink for audit events. Emission failures never fail the operation that
/// produced the event; callers log and continue.
#[async_trait]
pub trait EventsSink: Send + Sync {
    async fn callback_uri_updated(&self, event: &CallbackUriUpdatedEvent) -> Result<()>;
}

/// HTTP connector for the application-events service. The service answers
/// 201 on success; anything else is an error for the caller to swallow.
#[derive(Clone)]
pub struct EventsConnector {
    client: Client,
    base_url: String,
}

impl EventsConnector {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl EventsSink for EventsConnector {
    async fn callback_uri_updated(&self, event: &CallbackUriUpdatedEvent) -> Result<()> {
        let url = format!(
            "{}/application-events/ppnsCallbackUriUpdated",
            self.base_url
        );
        let response = self.client.post(&url).json(event).send().await?;

        if response.status() != StatusCode::CREATED {
            return Err(anyhow!(
                "Events service answered {} instead of 201",
                response.status()
            ));
        }
        Ok(())
    }
}

//! Callback URL lifecycle: ownership check, gateway probe, persistence and
//! the audit trail.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::boxes::{BoxId, BoxStore, Subscriber, UpdateSubscriberOutcome};
use crate::clients::ClientId;
use crate::events::{CallbackUriUpdatedEvent, EventsSink};
use crate::gateway::PushGateway;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCallbackUrlRequest {
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
    #[serde(rename = "callbackUrl")]
    pub callback_url: String,
}

/// Outcome of a callback URL update. Controllers map these to HTTP at the
/// edge; the validator itself never throws for domain failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackUpdateOutcome {
    Updated,
    ValidationFailed(String),
    UnableToUpdate(String),
    BoxNotFound,
    Unauthorized,
}

/// Verifies a candidate callback URL via the gateway before the registry
/// persists it, and emits an audit event when the URL actually changed.
pub struct CallbackValidator {
    box_store: Arc<dyn BoxStore>,
    gateway: Arc<dyn PushGateway>,
    events: Arc<dyn EventsSink>,
}

impl CallbackValidator {
    pub fn new(
        box_store: Arc<dyn BoxStore>,
        gateway: Arc<dyn PushGateway>,
        events: Arc<dyn EventsSink>,
    ) -> Self {
        Self {
            box_store,
            gateway,
            events,
        }
    }

    /// Validate and persist a new callback URL for a box.
    ///
    /// An empty URL skips validation entirely and clears the subscriber,
    /// leaving a pull-only box. Any non-empty URL must pass the gateway
    /// probe before it is stored.
    pub async fn validate_callback_url(
        &self,
        box_id: BoxId,
        request: UpdateCallbackUrlRequest,
    ) -> Result<CallbackUpdateOutcome> {
        let Some(notification_box) = self.box_store.get_box(&box_id)? else {
            return Ok(CallbackUpdateOutcome::BoxNotFound);
        };

        if request.client_id != notification_box.box_creator.client_id {
            return Ok(CallbackUpdateOutcome::Unauthorized);
        }

        let old_url = notification_box
            .current_callback_url()
            .unwrap_or_default()
            .to_string();

        if !request.callback_url.is_empty() {
            match self.gateway.validate_callback(&request.callback_url).await {
                Ok(response) if !response.successful => {
                    return Ok(CallbackUpdateOutcome::ValidationFailed(
                        response
                            .error_message
                            .unwrap_or_else(|| "Unknown Error".to_string()),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    return Ok(CallbackUpdateOutcome::UnableToUpdate(e.to_string()));
                }
            }
        }

        let subscriber = if request.callback_url.is_empty() {
            None
        } else {
            Some(Subscriber::Push {
                callback_url: request.callback_url.clone(),
                subscribed_at: Utc::now(),
            })
        };

        let updated = match self.box_store.update_subscriber(&box_id, subscriber) {
            Ok(UpdateSubscriberOutcome::Updated(updated)) => updated,
            Ok(UpdateSubscriberOutcome::BoxNotFound) => {
                return Ok(CallbackUpdateOutcome::BoxNotFound)
            }
            Err(e) => return Ok(CallbackUpdateOutcome::UnableToUpdate(e.to_string())),
        };

        if old_url != request.callback_url {
            info!(
                "Callback URL of box {} changed, emitting audit event",
                box_id
            );
            let event =
                CallbackUriUpdatedEvent::new(&updated, old_url, request.callback_url.clone());
            if let Err(e) = self.events.callback_uri_updated(&event).await {
                // Audit emission must not fail the update
                warn!("Failed to emit callback-updated event for box {}: {}", box_id, e);
            }
        }

        Ok(CallbackUpdateOutcome::Updated)
    }
}

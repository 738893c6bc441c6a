//! Outbound push dispatch: envelope signing, the gateway call, and outcome
//! classification.

use std::sync::Arc;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::debug;

use crate::boxes::NotificationBox;
use crate::clients::ClientStore;
use crate::gateway::{ForwardedHeader, OutboundNotification, PushGateway};
use crate::notifications::Notification;

type HmacSha1 = Hmac<Sha1>;

/// Header forwarded verbatim to the customer's callback.
pub const X_HUB_SIGNATURE: &str = "X-Hub-Signature";

/// Failure message when the gateway reports an unsuccessful delivery.
pub const GATEWAY_DELIVERY_FAILED: &str =
    "PPNS Gateway was unable to successfully deliver notification";

/// Result of one push attempt. Failures carry a reason and are recovered by
/// the retry machinery; nothing escapes as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Failed(String),
}

/// Sign an envelope with the client's active secret: lowercase hex HMAC-SHA1.
pub fn sign_envelope(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Turns a (box, notification) pair into one signed gateway call.
pub struct PushDispatcher {
    client_store: Arc<dyn ClientStore>,
    gateway: Arc<dyn PushGateway>,
}

impl PushDispatcher {
    pub fn new(client_store: Arc<dyn ClientStore>, gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            client_store,
            gateway,
        }
    }

    /// Push one notification to the box's callback. Any error along the way,
    /// including transport and timeouts, classifies as `Failed`.
    pub async fn push(
        &self,
        notification_box: &NotificationBox,
        notification: &Notification,
    ) -> PushOutcome {
        match self.try_push(notification_box, notification).await {
            Ok(outcome) => outcome,
            Err(e) => PushOutcome::Failed(e.to_string()),
        }
    }

    async fn try_push(
        &self,
        notification_box: &NotificationBox,
        notification: &Notification,
    ) -> Result<PushOutcome> {
        let destination_url = notification_box
            .push_callback_url()
            .context("Box has no valid push subscriber")?
            .to_string();

        let client = self
            .client_store
            .find_or_create_client(&notification_box.box_creator.client_id)?;
        let secret = client
            .active_secret()
            .context("Client has no signing secret")?;

        let envelope = serde_json::to_string(notification)?;
        let signature = sign_envelope(secret.as_str(), envelope.as_bytes());

        let outbound = OutboundNotification {
            destination_url,
            forwarded_headers: vec![ForwardedHeader {
                key: X_HUB_SIGNATURE.to_string(),
                value: signature,
            }],
            payload: envelope,
        };

        debug!(
            "Pushing notification {} to {}",
            notification.notification_id, outbound.destination_url
        );

        let response = self.gateway.notify(&outbound).await?;
        if response.successful {
            Ok(PushOutcome::Delivered)
        } else {
            Ok(PushOutcome::Failed(GATEWAY_DELIVERY_FAILED.to_string()))
        }
    }
}

//! Ingest orchestration for a single notification: persist, then best-effort
//! push.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::boxes::{BoxId, BoxStore};
use crate::notifications::{
    MessageContentType, Notification, NotificationId, NotificationStatus, NotificationStore,
};
use crate::push::{PushDispatcher, PushOutcome};

/// Outcome of one publish. `Accepted` means persisted and waiting for pull or
/// retry; `Delivered` means the ingest-time push already succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Accepted,
    DuplicateSuppressed,
    BoxNotFound,
}

/// Single entry point for new notifications.
pub struct DeliveryCoordinator {
    box_store: Arc<dyn BoxStore>,
    notification_store: Arc<dyn NotificationStore>,
    dispatcher: Arc<PushDispatcher>,
}

impl DeliveryCoordinator {
    pub fn new(
        box_store: Arc<dyn BoxStore>,
        notification_store: Arc<dyn NotificationStore>,
        dispatcher: Arc<PushDispatcher>,
    ) -> Self {
        Self {
            box_store,
            notification_store,
            dispatcher,
        }
    }

    /// Persist a notification and, when the box has a valid push subscriber,
    /// attempt one push. The attempt is bounded by the gateway timeout and
    /// its failure never fails the publish: the notification stays PENDING
    /// for the retry sweeper.
    pub async fn save_and_maybe_push(
        &self,
        box_id: BoxId,
        notification_id: NotificationId,
        content_type: MessageContentType,
        payload: String,
    ) -> Result<PublishOutcome> {
        let Some(notification_box) = self.box_store.get_box(&box_id)? else {
            return Ok(PublishOutcome::BoxNotFound);
        };

        let notification = Notification::new(notification_id, box_id, content_type, payload);
        if self.notification_store.save(&notification)?.is_none() {
            debug!(
                "Duplicate notification {} for box {}, suppressed",
                notification_id, box_id
            );
            return Ok(PublishOutcome::DuplicateSuppressed);
        }

        if notification_box.push_callback_url().is_none() {
            return Ok(PublishOutcome::Accepted);
        }

        match self.dispatcher.push(&notification_box, &notification).await {
            PushOutcome::Delivered => {
                self.notification_store
                    .update_status(&notification_id, NotificationStatus::Acknowledged)?;
                Ok(PublishOutcome::Delivered)
            }
            PushOutcome::Failed(reason) => {
                info!(
                    "Push of {} failed at ingest, leaving pending for retry: {}",
                    notification_id, reason
                );
                Ok(PublishOutcome::Accepted)
            }
        }
    }
}

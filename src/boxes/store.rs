use anyhow::Result;

use super::{BoxId, NotificationBox, Subscriber};
use crate::clients::ClientId;

/// Outcome of a box creation attempt. A (client, name) collision hands back
/// the existing box instead of creating a duplicate row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateBoxOutcome {
    Created(NotificationBox),
    Retrieved(NotificationBox),
}

impl CreateBoxOutcome {
    pub fn into_box(self) -> NotificationBox {
        match self {
            CreateBoxOutcome::Created(b) | CreateBoxOutcome::Retrieved(b) => b,
        }
    }
}

/// Outcome of replacing a box's subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSubscriberOutcome {
    Updated(NotificationBox),
    BoxNotFound,
}

/// Storage operations for boxes.
pub trait BoxStore: Send + Sync {
    /// Create a box owned by `client_id`, or return the existing one when
    /// the (client, name) pair is already taken. Box ids are server-assigned.
    fn create_box(&self, client_id: &ClientId, box_name: &str) -> Result<CreateBoxOutcome>;

    fn get_box(&self, box_id: &BoxId) -> Result<Option<NotificationBox>>;

    fn get_box_by_name_and_client_id(
        &self,
        box_name: &str,
        client_id: &ClientId,
    ) -> Result<Option<NotificationBox>>;

    /// Atomically replace the box's subscriber. `None` clears it, leaving a
    /// pull-only box.
    fn update_subscriber(
        &self,
        box_id: &BoxId,
        subscriber: Option<Subscriber>,
    ) -> Result<UpdateSubscriberOutcome>;
}

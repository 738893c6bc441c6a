use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::{Notification, NotificationId, NotificationStatus};
use crate::boxes::{BoxId, NotificationBox};

/// Storage operations for notifications.
///
/// This trait is the only writer of notification state; the delivery
/// coordinator and the retry sweeper drive it through these methods and
/// never bypass it. State transitions are absolute or conditional writes so
/// concurrent writers stay safe: the terminal states are absorbing.
pub trait NotificationStore: Send + Sync {
    /// Insert a notification. Returns `None` when the unique index on
    /// (notification_id, box_id, status) rejects a duplicate; every other
    /// persistence failure propagates.
    fn save(&self, notification: &Notification) -> Result<Option<NotificationId>>;

    /// Notifications of one box, ascending by creation time, with optional
    /// status filter and inclusive creation-time bounds.
    fn get_by_box_id_and_filters(
        &self,
        box_id: &BoxId,
        status: Option<NotificationStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Notification>>;

    /// Acknowledge the given pending notifications of a box, stamping
    /// `read_at`. Returns how many rows actually changed; already-terminal
    /// rows are left alone, which makes the operation idempotent.
    fn acknowledge(&self, box_id: &BoxId, ids: &[NotificationId]) -> Result<usize>;

    /// Unconditional status write, returning the post-image. A transition to
    /// `Acknowledged` through this path stamps `pushed_at`.
    fn update_status(
        &self,
        notification_id: &NotificationId,
        status: NotificationStatus,
    ) -> Result<Notification>;

    /// Schedule the next push attempt and bump the attempt counter.
    fn update_retry_after(
        &self,
        notification_id: &NotificationId,
        when: DateTime<Utc>,
    ) -> Result<Notification>;

    /// One window of retry-eligible notifications joined to their box:
    /// pending, `retry_after` absent or not after `now`, box has a push
    /// subscriber with a non-empty callback URL. Finite and restartable;
    /// callers drain windows until an empty one comes back.
    fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Notification, NotificationBox)>>;

    /// Physically delete notifications older than `ttl`. Returns the number
    /// of rows removed.
    fn purge_expired(&self, ttl: Duration) -> Result<usize>;
}

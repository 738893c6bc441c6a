//! Notifications: the messages published into boxes and their delivery
//! lifecycle.

mod models;
mod store;

pub use models::{MessageContentType, Notification, NotificationId, NotificationStatus};
pub use store::NotificationStore;

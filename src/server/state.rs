use axum::extract::FromRef;

use crate::boxes::BoxStore;
use crate::callback::CallbackValidator;
use crate::delivery::DeliveryCoordinator;
use crate::notifications::NotificationStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedBoxStore = Arc<dyn BoxStore>;
pub type GuardedNotificationStore = Arc<dyn NotificationStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub box_store: GuardedBoxStore,
    pub notification_store: GuardedNotificationStore,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub callback_validator: Arc<CallbackValidator>,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedBoxStore {
    fn from_ref(input: &ServerState) -> Self {
        input.box_store.clone()
    }
}

impl FromRef<ServerState> for GuardedNotificationStore {
    fn from_ref(input: &ServerState) -> Self {
        input.notification_store.clone()
    }
}

impl FromRef<ServerState> for Arc<DeliveryCoordinator> {
    fn from_ref(input: &ServerState) -> Self {
        input.coordinator.clone()
    }
}

impl FromRef<ServerState> for Arc<CallbackValidator> {
    fn from_ref(input: &ServerState) -> Self {
        input.callback_validator.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{log_requests, state::*, user_agent_allowed, RequestsLoggingLevel, ServerConfig};
use crate::boxes::{BoxId, BoxStore, CreateBoxOutcome};
use crate::callback::{CallbackUpdateOutcome, CallbackValidator, UpdateCallbackUrlRequest};
use crate::clients::ClientId;
use crate::delivery::{DeliveryCoordinator, PublishOutcome};
use crate::notifications::{
    MessageContentType, NotificationId, NotificationStatus, NotificationStore,
};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Deserialize, Debug)]
struct CreateBoxBody {
    #[serde(rename = "boxName")]
    pub box_name: String,
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
}

#[derive(Serialize, Debug)]
struct BoxIdResponse {
    #[serde(rename = "boxId")]
    pub box_id: BoxId,
}

#[derive(Deserialize, Debug)]
struct GetBoxQuery {
    #[serde(rename = "boxName")]
    pub box_name: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<ClientId>,
}

#[derive(Serialize, Debug)]
struct CallbackUpdateResponse {
    pub successful: bool,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PublishQuery {
    #[serde(rename = "notificationId")]
    pub notification_id: Option<NotificationId>,
}

#[derive(Serialize, Debug)]
struct PublishResponse {
    #[serde(rename = "notificationId")]
    pub notification_id: NotificationId,
}

#[derive(Deserialize, Debug)]
struct ListNotificationsQuery {
    pub status: Option<String>,
    #[serde(rename = "fromDate")]
    pub from_date: Option<String>,
    #[serde(rename = "toDate")]
    pub to_date: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AcknowledgeBody {
    #[serde(rename = "notificationIds")]
    pub notification_ids: Vec<NotificationId>,
}

#[derive(Serialize, Debug)]
struct ErrorMessage {
    pub message: String,
}

fn error_body(message: impl Into<String>) -> Json<ErrorMessage> {
    Json(ErrorMessage {
        message: message.into(),
    })
}

// =============================================================================
// Handlers
// =============================================================================

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

/// PUT /box - create a box or retrieve the existing one.
async fn put_box(
    State(config): State<ServerConfig>,
    State(box_store): State<GuardedBoxStore>,
    headers: HeaderMap,
    payload: Result<Json<CreateBoxBody>, JsonRejection>,
) -> Response {
    if !user_agent_allowed(&headers, &config.allowed_user_agents) {
        warn!("Rejected box creation from disallowed user agent");
        return StatusCode::FORBIDDEN.into_response();
    }

    let body = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => {
            return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response()
        }
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, error_body(rejection.to_string())).into_response()
        }
    };

    if body.box_name.is_empty() || body.client_id.as_str().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("boxName and clientId must be non-empty"),
        )
            .into_response();
    }

    match box_store.create_box(&body.client_id, &body.box_name) {
        Ok(CreateBoxOutcome::Created(created)) => (
            StatusCode::CREATED,
            Json(BoxIdResponse {
                box_id: created.box_id,
            }),
        )
            .into_response(),
        Ok(CreateBoxOutcome::Retrieved(existing)) => (
            StatusCode::OK,
            Json(BoxIdResponse {
                box_id: existing.box_id,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("Box creation failed: {}", e);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_body("Box creation failed"),
            )
                .into_response()
        }
    }
}

/// GET /box?boxName=..&clientId=.. - look up a box by name and owner.
async fn get_box(
    State(box_store): State<GuardedBoxStore>,
    Query(query): Query<GetBoxQuery>,
) -> Response {
    let (Some(box_name), Some(client_id)) = (query.box_name, query.client_id) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("boxName and clientId query parameters are required"),
        )
            .into_response();
    };

    match box_store.get_box_by_name_and_client_id(&box_name, &client_id) {
        Ok(Some(found)) => Json(found).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Box lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// PUT /box/{boxId}/callback - validate and persist a callback URL.
async fn put_callback(
    State(validator): State<Arc<CallbackValidator>>,
    Path(box_id): Path<BoxId>,
    Json(body): Json<UpdateCallbackUrlRequest>,
) -> Response {
    match validator.validate_callback_url(box_id, body).await {
        Ok(CallbackUpdateOutcome::Updated) => Json(CallbackUpdateResponse {
            successful: true,
            error_message: None,
        })
        .into_response(),
        Ok(CallbackUpdateOutcome::ValidationFailed(message))
        | Ok(CallbackUpdateOutcome::UnableToUpdate(message)) => Json(CallbackUpdateResponse {
            successful: false,
            error_message: Some(message),
        })
        .into_response(),
        Ok(CallbackUpdateOutcome::BoxNotFound) => StatusCode::NOT_FOUND.into_response(),
        Ok(CallbackUpdateOutcome::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            error_body("clientId does not match boxCreator"),
        )
            .into_response(),
        Err(e) => {
            warn!("Callback update failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /box/{boxId}/notifications - publish a JSON or XML message.
async fn post_notification(
    State(coordinator): State<Arc<DeliveryCoordinator>>,
    Path(box_id): Path<BoxId>,
    Query(query): Query<PublishQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(MessageContentType::from_mime);
    let Some(content_type) = content_type else {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    };

    let Ok(payload) = String::from_utf8(body.to_vec()) else {
        return (StatusCode::BAD_REQUEST, error_body("Body is not valid UTF-8")).into_response();
    };

    let valid = match content_type {
        MessageContentType::Json => serde_json::from_str::<serde_json::Value>(&payload).is_ok(),
        MessageContentType::Xml => !payload.trim().is_empty(),
    };
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            error_body(format!("Body does not match {}", content_type.as_mime())),
        )
            .into_response();
    }

    let notification_id = query.notification_id.unwrap_or_else(NotificationId::random);
    debug!("Publishing notification {} into box {}", notification_id, box_id);

    match coordinator
        .save_and_maybe_push(box_id, notification_id, content_type, payload)
        .await
    {
        Ok(PublishOutcome::Delivered) | Ok(PublishOutcome::Accepted) => (
            StatusCode::CREATED,
            Json(PublishResponse { notification_id }),
        )
            .into_response(),
        Ok(PublishOutcome::DuplicateSuppressed) => {
            (StatusCode::OK, Json(PublishResponse { notification_id })).into_response()
        }
        Ok(PublishOutcome::BoxNotFound) => (
            StatusCode::NOT_FOUND,
            error_body(format!("BoxId: {} not found", box_id)),
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to persist notification: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /box/{boxId}/notifications - list notifications for pull consumers.
async fn get_notifications(
    State(config): State<ServerConfig>,
    State(box_store): State<GuardedBoxStore>,
    State(notification_store): State<GuardedNotificationStore>,
    Path(box_id): Path<BoxId>,
    Query(query): Query<ListNotificationsQuery>,
) -> Response {
    match box_store.get_box(&box_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Box lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<NotificationStatus>() {
            Ok(status) => Some(status),
            Err(()) => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_body(format!("Invalid status: {}", raw)),
                )
                    .into_response()
            }
        },
    };

    let parse_date = |raw: &str| {
        chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&chrono::Utc))
    };
    let from = match query.from_date.as_deref().map(parse_date).transpose() {
        Ok(from) => from,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, error_body("Invalid fromDate")).into_response()
        }
    };
    let to = match query.to_date.as_deref().map(parse_date).transpose() {
        Ok(to) => to,
        Err(_) => return (StatusCode::BAD_REQUEST, error_body("Invalid toDate")).into_response(),
    };

    match notification_store.get_by_box_id_and_filters(
        &box_id,
        status,
        from,
        to,
        config.notifications_per_request,
    ) {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => {
            warn!("Notification listing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// PUT /box/{boxId}/notifications/acknowledge - pull-consumer acknowledge.
async fn acknowledge_notifications(
    State(box_store): State<GuardedBoxStore>,
    State(notification_store): State<GuardedNotificationStore>,
    Path(box_id): Path<BoxId>,
    Json(body): Json<AcknowledgeBody>,
) -> Response {
    match box_store.get_box(&box_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Box lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if body.notification_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("notificationIds must be non-empty"),
        )
            .into_response();
    }

    match notification_store.acknowledge(&box_id, &body.notification_ids) {
        Ok(modified) => {
            if modified < body.notification_ids.len() {
                warn!(
                    "Acknowledge on box {} modified {} of {} requested notifications",
                    box_id,
                    modified,
                    body.notification_ids.len()
                );
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!("Acknowledge failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// =============================================================================
// App wiring
// =============================================================================

pub fn make_app(
    config: ServerConfig,
    box_store: GuardedBoxStore,
    notification_store: GuardedNotificationStore,
    coordinator: Arc<DeliveryCoordinator>,
    callback_validator: Arc<CallbackValidator>,
    hash: String,
) -> Result<Router> {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        box_store,
        notification_store,
        coordinator,
        callback_validator,
        hash,
    };

    let app = Router::new()
        .route("/", get(home))
        .route("/box", put(put_box).get(get_box))
        .route("/box/{box_id}/callback", put(put_callback))
        .route(
            "/box/{box_id}/notifications",
            post(post_notification).get(get_notifications),
        )
        .route(
            "/box/{box_id}/notifications/acknowledge",
            put(acknowledge_notifications),
        )
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state);

    Ok(app)
}

#[allow(clippy::too_many_arguments)]
pub async fn run_server(
    box_store: GuardedBoxStore,
    notification_store: GuardedNotificationStore,
    coordinator: Arc<DeliveryCoordinator>,
    callback_validator: Arc<CallbackValidator>,
    config: ServerConfig,
    hash: String,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let port = config.port;
    let app = make_app(
        config,
        box_store,
        notification_store,
        coordinator,
        callback_validator,
        hash,
    )?;

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?)
}

//! In-process stand-ins for the push gateway and the application-events
//! service. Each spawns a real HTTP server on a random port so the hub
//! exercises its actual reqwest clients, and records every request for
//! assertions.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

#[derive(Default)]
pub struct GatewayState {
    /// Scripted outcomes for /notify, consumed front to back; the last
    /// outcome repeats, and an empty script means `successful: true`.
    pub notify_script: VecDeque<bool>,
    pub notify_requests: Vec<serde_json::Value>,
    pub notify_auth_headers: Vec<Option<String>>,
    /// Response for /validate-callback: (successful, errorMessage).
    pub validate_response: (bool, Option<String>),
    pub validate_requests: Vec<serde_json::Value>,
}

/// Scriptable mock of the external push gateway.
#[derive(Clone)]
pub struct MockGateway {
    pub base_url: String,
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub async fn spawn() -> Self {
        let state = Arc::new(Mutex::new(GatewayState {
            validate_response: (true, None),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/notify", post(handle_notify))
            .route("/validate-callback", post(handle_validate))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock gateway");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Mock gateway failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    /// Queue /notify outcomes; the last one keeps repeating.
    pub fn script_notify(&self, outcomes: &[bool]) {
        let mut state = self.state.lock().unwrap();
        state.notify_script = outcomes.iter().copied().collect();
    }

    pub fn set_validate_response(&self, successful: bool, error_message: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.validate_response = (successful, error_message.map(str::to_string));
    }

    pub fn notify_requests(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().notify_requests.clone()
    }

    pub fn notify_auth_headers(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().notify_auth_headers.clone()
    }

    pub fn validate_requests(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().validate_requests.clone()
    }
}

async fn handle_notify(
    State(state): State<Arc<Mutex<GatewayState>>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.notify_requests.push(body);
    state.notify_auth_headers.push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let successful = if state.notify_script.len() > 1 {
        state.notify_script.pop_front().unwrap_or(true)
    } else {
        state.notify_script.front().copied().unwrap_or(true)
    };
    Json(serde_json::json!({ "successful": successful }))
}

async fn handle_validate(
    State(state): State<Arc<Mutex<GatewayState>>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.validate_requests.push(body);

    let (successful, ref error_message) = state.validate_response;
    match error_message {
        Some(message) => Json(serde_json::json!({
            "successful": successful,
            "errorMessage": message,
        })),
        None => Json(serde_json::json!({ "successful": successful })),
    }
}

/// Recording mock of the application-events service. Always answers 201.
#[derive(Clone)]
pub struct MockEventsService {
    pub base_url: String,
    events: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockEventsService {
    pub async fn spawn() -> Self {
        let events: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route(
                "/application-events/ppnsCallbackUriUpdated",
                post(handle_event),
            )
            .with_state(events.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock events service");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Mock events service failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            events,
        }
    }

    pub fn received_events(&self) -> Vec<serde_json::Value> {
        self.events.lock().unwrap().clone()
    }
}

async fn handle_event(
    State(events): State<Arc<Mutex<Vec<serde_json::Value>>>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    events.lock().unwrap().push(body);
    StatusCode::CREATED
}

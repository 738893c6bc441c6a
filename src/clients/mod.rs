//! API client identities and their signing secrets.

mod store;

pub use store::ClientStore;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// External identity of an API client, opaque to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        ClientId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque signing secret. Secrets are never logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(pub String);

impl ClientSecret {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate a fresh random secret: 32 random bytes, URL-safe base64.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        ClientSecret(URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientSecret(<redacted>)")
    }
}

/// A client with its ordered secrets. The first secret is the active signing
/// secret; the remainder are accepted during rotation windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub client_id: ClientId,
    pub secrets: Vec<ClientSecret>,
}

impl Client {
    /// The secret used to sign outbound pushes.
    pub fn active_secret(&self) -> Option<&ClientSecret> {
        self.secrets.first()
    }
}

use anyhow::Result;

use super::{Client, ClientId, ClientSecret};

/// Storage operations for API clients.
///
/// Clients are created lazily on first reference and never deleted.
pub trait ClientStore: Send + Sync {
    /// Look up a client, creating it with a freshly generated secret when it
    /// does not exist yet. Idempotent.
    fn find_or_create_client(&self, client_id: &ClientId) -> Result<Client>;

    /// Read-only secret lookup. `None` when the client has never been seen.
    fn get_client_secrets(&self, client_id: &ClientId) -> Result<Option<Vec<ClientSecret>>>;
}

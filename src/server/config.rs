use super::RequestsLoggingLevel;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// User agents allowed to create boxes. An empty list denies everyone.
    pub allowed_user_agents: Vec<String>,
    /// Default page size for notification listings.
    pub notifications_per_request: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 6701,
            allowed_user_agents: Vec::new(),
            notifications_per_request: 100,
        }
    }
}

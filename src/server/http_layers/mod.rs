mod requests_logging;
mod user_agent;

pub use requests_logging::{log_requests, RequestsLoggingLevel};
pub use user_agent::user_agent_allowed;

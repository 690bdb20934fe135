// LLM Key Gateway
// API-key issuance, authorization and rate limiting in front of a local
// inference endpoint.

pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod rate_limit;
pub mod routes;
pub mod security;

// Re-export commonly used items
pub use config::GatewayConfig;
pub use database::Database;
pub use errors::{ApiError, AuthError};
pub use models::{IssuedKey, KeyRecord};
pub use proxy::{GatewayProxy, Operation};
pub use rate_limit::{Identity, RateLimitManager, RateLimiter, RatePolicy};
pub use routes::{build_router, AppState};
pub use security::{ApiKeyService, KeyHasher};

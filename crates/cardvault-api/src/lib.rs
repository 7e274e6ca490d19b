//! cardvault-api - reference collection service
//!
//! Serves bulk-sync deltas and collection mutations over HTTP. State is kept
//! in memory; clients treat this service as the authority.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod store;

pub use config::AppConfig;
pub use routes::{app_router, AppState};

pub mod auth;
pub mod config;
pub mod error;
pub mod forms;
pub mod mail;
pub mod models;
pub mod password;
pub mod repo;
pub mod routes;
pub mod security;
pub mod views;

// Re-export commonly used items for tests / the binary
pub use config::AppConfig;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;

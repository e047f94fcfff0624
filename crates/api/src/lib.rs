//! Beacon Auth API Library
//!
//! Identity and federated-session service: password accounts, OAuth 2.0
//! (PKCE) sign-in with Twitter and GitHub, signed session tokens and
//! admin approval.

pub mod auth;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod oauth;
pub mod routes;
pub mod security;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

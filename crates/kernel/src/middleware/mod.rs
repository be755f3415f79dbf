//! HTTP middleware components.

pub mod admin_token;

pub use admin_token::require_admin_token;

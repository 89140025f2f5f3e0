//! # atlas-admin
//!
//! Atlas Administration API client.
//! Provides the control plane the broker uses to create scoped database
//! accounts and look up cluster connection strings.

mod auth;
mod client;
mod error;
mod types;

pub use auth::AdminAuth;
pub use client::{AtlasAdminClient, DEFAULT_BASE_URL};
pub use error::{AdminError, AdminResult, ApiErrorKind};
pub use types::*;

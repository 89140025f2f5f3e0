//! Credential type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::control_plane::DatabaseAccount;

/// Secret value - automatically zeroed when dropped
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: String) -> Self {
        Self { value }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Length of the secret in bytes
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Scoped, self-expiring database account owned by one project.
///
/// Lives only in memory. The control plane never returns the password, so
/// this is the only copy.
pub struct ScopedCredential {
    /// Database username
    pub username: String,

    /// Plaintext password
    pub password: SecretString,

    /// When the account was requested
    pub created_at: DateTime<Utc>,

    /// When the control plane deletes the account
    pub expires_at: DateTime<Utc>,

    /// Project the account was created in
    pub owner_project_id: String,

    /// Account descriptor as returned by the control plane
    pub account: DatabaseAccount,
}

impl ScopedCredential {
    /// Whether the remote account has passed its deletion deadline
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("username", &self.username)
            .field("password", &self.password)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("owner_project_id", &self.owner_project_id)
            .finish()
    }
}

//! Provisioning of scoped database accounts through the control plane

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::password::{random_identifier, PasswordGenerator};
use super::types::ScopedCredential;
use crate::control_plane::{ControlPlane, RoleAssignment, ScopedAccountSpec};
use crate::error::{BrokerError, Result};
use crate::settings::AccountSettings;

/// Length of the random part of generated usernames
const IDENTIFIER_LENGTH: usize = 10;

/// Creates one scoped, self-deleting account per call.
///
/// Not idempotent: two calls for the same project create two remote
/// accounts. The pool guards calls with its credential cache.
pub struct CredentialProvisioner {
    /// Control-plane API
    control_plane: Arc<dyn ControlPlane>,
    /// Password source
    passwords: Arc<dyn PasswordGenerator>,
    /// Account shape and lifetime
    settings: AccountSettings,
}

impl CredentialProvisioner {
    /// Create a new provisioner
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        passwords: Arc<dyn PasswordGenerator>,
        settings: AccountSettings,
    ) -> Self {
        Self {
            control_plane,
            passwords,
            settings,
        }
    }

    /// Provision a new account in `project_id`
    pub async fn provision(&self, project_id: &str) -> Result<ScopedCredential> {
        let failed = |e: BrokerError| BrokerError::Provisioning {
            project_id: project_id.to_string(),
            message: e.to_string(),
        };

        let password = self
            .passwords
            .generate(&self.settings.password_policy())
            .map_err(failed)?;
        let identifier = random_identifier(IDENTIFIER_LENGTH).map_err(failed)?;
        let username = format!("{}{}", self.settings.username_prefix, identifier);

        let ttl = chrono::Duration::from_std(self.settings.ttl()).map_err(|e| {
            BrokerError::Provisioning {
                project_id: project_id.to_string(),
                message: format!("account TTL out of range: {}", e),
            }
        })?;
        let created_at = Utc::now();
        let expires_at = created_at + ttl;

        let spec = ScopedAccountSpec {
            username: username.clone(),
            password: password.clone(),
            database_name: self.settings.auth_database.clone(),
            roles: vec![RoleAssignment::new(
                &self.settings.role_name,
                &self.settings.role_database,
            )],
            description: format!(
                "{}, automatically deleted after {}",
                self.settings.description_label,
                expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
            delete_after: expires_at,
        };

        debug!("Creating scoped account {} in project {}", username, project_id);

        let account = self
            .control_plane
            .create_scoped_account(project_id, &spec)
            .await
            .map_err(failed)?;

        info!(
            "Provisioned scoped account {} in project {} (expires {})",
            account.username, project_id, expires_at
        );

        Ok(ScopedCredential {
            username: account.username.clone(),
            password,
            created_at,
            expires_at,
            owner_project_id: project_id.to_string(),
            account,
        })
    }
}

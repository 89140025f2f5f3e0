//! Control-plane capability: account provisioning and cluster metadata

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::SecretString;
use crate::error::Result;

/// Role granted to a database account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Database the role is defined on
    pub database_name: String,
    /// Role name (e.g. "readAnyDatabase")
    pub role_name: String,
}

impl RoleAssignment {
    pub fn new(role_name: &str, database_name: &str) -> Self {
        Self {
            database_name: database_name.to_string(),
            role_name: role_name.to_string(),
        }
    }
}

/// Request for a scoped, self-deleting database account
#[derive(Debug, Clone)]
pub struct ScopedAccountSpec {
    pub username: String,
    pub password: SecretString,
    /// Authentication database
    pub database_name: String,
    pub roles: Vec<RoleAssignment>,
    pub description: String,
    /// Deadline after which the control plane removes the account
    pub delete_after: DateTime<Utc>,
}

/// How a database account authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountAuth {
    /// SCRAM username/password
    #[default]
    Password,
    /// AWS IAM user or role
    AwsIam,
    /// X.509 certificate
    X509,
    /// LDAP user or group
    Ldap,
    /// OIDC workforce or workload identity
    Oidc,
}

/// Database account as known to the control plane, normalized from
/// whatever payload shape the API returned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseAccount {
    pub username: String,
    pub project_id: String,
    pub database_name: String,
    pub roles: Vec<RoleAssignment>,
    pub description: Option<String>,
    pub delete_after: Option<DateTime<Utc>>,
    pub auth: AccountAuth,
}

/// Connection strings published for a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStrings {
    /// Seed-list form, e.g. `mongodb://host1:27017,host2:27017/?ssl=true`
    pub standard: Option<String>,
    /// DNS SRV form, e.g. `mongodb+srv://cluster0.abcde.mongodb.net`
    pub standard_srv: Option<String>,
}

/// Cluster metadata relevant to connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub name: String,
    pub project_id: String,
    pub connection_strings: ConnectionStrings,
}

/// Control-plane API used to provision accounts and look up clusters
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a database account in `project_id`
    async fn create_scoped_account(
        &self,
        project_id: &str,
        spec: &ScopedAccountSpec,
    ) -> Result<DatabaseAccount>;

    /// Fetch metadata for `cluster_name` in `project_id`
    async fn cluster_metadata(&self, project_id: &str, cluster_name: &str)
        -> Result<ClusterMetadata>;
}

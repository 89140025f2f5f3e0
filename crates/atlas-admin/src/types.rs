//! Atlas API payloads and their normalization into broker types

use broker_core::{
    AccountAuth, ClusterMetadata, ConnectionStrings, DatabaseAccount, RoleAssignment,
    ScopedAccountSpec,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role granted to a database user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserRole {
    pub role_name: String,
    pub database_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

impl From<&RoleAssignment> for DatabaseUserRole {
    fn from(role: &RoleAssignment) -> Self {
        Self {
            role_name: role.role_name.clone(),
            database_name: role.database_name.clone(),
            collection_name: None,
        }
    }
}

impl From<DatabaseUserRole> for RoleAssignment {
    fn from(role: DatabaseUserRole) -> Self {
        RoleAssignment::new(&role.role_name, &role.database_name)
    }
}

/// Body of `POST /groups/{groupId}/databaseUsers`
///
/// No `Debug`: it borrows the plaintext password.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabaseUser<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub database_name: &'a str,
    pub group_id: &'a str,
    pub roles: Vec<DatabaseUserRole>,
    pub description: &'a str,
    pub delete_after_date: DateTime<Utc>,
}

impl<'a> CreateDatabaseUser<'a> {
    pub fn from_spec(project_id: &'a str, spec: &'a ScopedAccountSpec) -> Self {
        Self {
            username: &spec.username,
            password: spec.password.expose(),
            database_name: &spec.database_name,
            group_id: project_id,
            roles: spec.roles.iter().map(DatabaseUserRole::from).collect(),
            description: &spec.description,
            delete_after_date: spec.delete_after,
        }
    }
}

/// Database user as returned by the current `databaseUsers` endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDatabaseUser {
    pub username: String,
    pub database_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<DatabaseUserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_date: Option<DateTime<Utc>>,
    #[serde(rename = "awsIAMType", default, skip_serializing_if = "Option::is_none")]
    pub aws_iam_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap_auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_auth_type: Option<String>,
}

/// Database user in the older listing shape: no description, no OIDC,
/// and a free-form expiry string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDatabaseUser {
    pub username: String,
    pub database_name: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<DatabaseUserRole>,
    #[serde(default)]
    pub delete_after_date: Option<String>,
    #[serde(rename = "awsIAMType", default)]
    pub aws_iam_type: Option<String>,
    #[serde(default)]
    pub x509_type: Option<String>,
    #[serde(default)]
    pub ldap_auth_type: Option<String>,
}

/// Either user shape; each endpoint knows which one it returns
#[derive(Debug, Clone)]
pub enum UserPayload {
    Current(CloudDatabaseUser),
    Legacy(LegacyDatabaseUser),
}

impl UserPayload {
    /// Normalize into a `DatabaseAccount`, falling back to `project_id`
    /// when the payload omits its group
    pub fn into_account(self, project_id: &str) -> DatabaseAccount {
        match self {
            UserPayload::Current(user) => DatabaseAccount {
                auth: auth_kind(
                    user.aws_iam_type.as_deref(),
                    user.x509_type.as_deref(),
                    user.ldap_auth_type.as_deref(),
                    user.oidc_auth_type.as_deref(),
                ),
                username: user.username,
                project_id: user.group_id.unwrap_or_else(|| project_id.to_string()),
                database_name: user.database_name,
                roles: user.roles.into_iter().map(RoleAssignment::from).collect(),
                description: user.description,
                delete_after: user.delete_after_date,
            },
            UserPayload::Legacy(user) => DatabaseAccount {
                auth: auth_kind(
                    user.aws_iam_type.as_deref(),
                    user.x509_type.as_deref(),
                    user.ldap_auth_type.as_deref(),
                    None,
                ),
                delete_after: user
                    .delete_after_date
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                username: user.username,
                project_id: user.group_id.unwrap_or_else(|| project_id.to_string()),
                database_name: user.database_name,
                roles: user.roles.into_iter().map(RoleAssignment::from).collect(),
                description: None,
            },
        }
    }
}

/// `NONE` (or absent) means the mechanism is not in use
fn auth_kind(
    aws_iam: Option<&str>,
    x509: Option<&str>,
    ldap: Option<&str>,
    oidc: Option<&str>,
) -> AccountAuth {
    let used = |value: Option<&str>| value.map_or(false, |v| !v.eq_ignore_ascii_case("NONE"));

    if used(aws_iam) {
        AccountAuth::AwsIam
    } else if used(x509) {
        AccountAuth::X509
    } else if used(ldap) {
        AccountAuth::Ldap
    } else if used(oidc) {
        AccountAuth::Oidc
    } else {
        AccountAuth::Password
    }
}

/// One page of a listing endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

/// Connection strings block of a cluster description
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConnectionStrings {
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub standard_srv: Option<String>,
}

/// Cluster description, reduced to what connecting needs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescription {
    pub name: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default)]
    pub connection_strings: Option<ClusterConnectionStrings>,
}

impl ClusterDescription {
    pub fn into_metadata(self, project_id: &str) -> ClusterMetadata {
        let strings = self.connection_strings.unwrap_or_default();
        ClusterMetadata {
            name: self.name,
            project_id: self.group_id.unwrap_or_else(|| project_id.to_string()),
            connection_strings: ConnectionStrings {
                standard: strings.standard,
                standard_srv: strings.standard_srv,
            },
        }
    }
}

/// Error body returned with non-success statuses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// OAuth token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

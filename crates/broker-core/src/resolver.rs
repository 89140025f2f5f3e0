//! Resolution of cluster connection targets
//!
//! The standard seed-list form is preferred: the SRV form needs DNS SRV/TXT
//! lookups that happen on the client and cannot be tunneled through SOCKS5.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::control_plane::ControlPlane;
use crate::error::{BrokerError, Result};

const STANDARD_PREFIX: &str = "mongodb://";
const SRV_PREFIX: &str = "mongodb+srv://";

/// Connection string scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `mongodb://` seed list
    Standard,
    /// `mongodb+srv://` DNS seed list
    Srv,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Standard => "mongodb",
            Scheme::Srv => "mongodb+srv",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme and host list of a cluster, without credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: Scheme,
    /// Everything after `scheme://`: hosts plus optional path and options
    pub hosts: String,
    /// Whether the SRV form was used because no standard form exists
    pub srv_fallback: bool,
}

/// Looks up cluster connection strings through the control plane
pub struct ConnectionResolver {
    control_plane: Arc<dyn ControlPlane>,
}

impl ConnectionResolver {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Resolve the connection target of `cluster_name` in `project_id`
    pub async fn resolve(&self, project_id: &str, cluster_name: &str) -> Result<ResolvedTarget> {
        let failed = |message: String| BrokerError::Resolution {
            project_id: project_id.to_string(),
            cluster: cluster_name.to_string(),
            message,
        };

        let metadata = self
            .control_plane
            .cluster_metadata(project_id, cluster_name)
            .await
            .map_err(|e| failed(format!("failed to get cluster: {}", e)))?;

        let strings = &metadata.connection_strings;

        if let Some(standard) = non_empty(&strings.standard) {
            info!(
                "Using standard connection string for cluster {} in project {}",
                cluster_name, project_id
            );
            return Ok(ResolvedTarget {
                scheme: Scheme::Standard,
                hosts: standard.strip_prefix(STANDARD_PREFIX).unwrap_or(standard).to_string(),
                srv_fallback: false,
            });
        }

        if let Some(srv) = non_empty(&strings.standard_srv) {
            warn!(
                "No standard connection string for cluster {} in project {}, falling back to SRV (DNS lookups bypass the proxy)",
                cluster_name, project_id
            );
            return Ok(ResolvedTarget {
                scheme: Scheme::Srv,
                hosts: srv.strip_prefix(SRV_PREFIX).unwrap_or(srv).to_string(),
                srv_fallback: true,
            });
        }

        error!(
            "Cluster {} in project {} publishes no connection string",
            cluster_name, project_id
        );
        Err(failed("cluster does not have a connection string".to_string()))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

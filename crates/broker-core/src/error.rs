//! Error types for broker-core

use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker error types
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Failed to provision scoped account for project {project_id}: {message}")]
    Provisioning { project_id: String, message: String },

    #[error("Failed to resolve cluster {cluster} in project {project_id}: {message}")]
    Resolution {
        project_id: String,
        cluster: String,
        message: String,
    },

    #[error("Failed to build proxy dialer: {0}")]
    Dialer(String),

    #[error("Dial to cluster {cluster} in project {project_id} failed on attempt {attempt}: {message}")]
    Dial {
        project_id: String,
        cluster: String,
        attempt: u32,
        message: String,
    },

    #[error("Ping to cluster {cluster} in project {project_id} failed on attempt {attempt}: {message}")]
    Ping {
        project_id: String,
        cluster: String,
        attempt: u32,
        message: String,
    },

    #[error("Could not connect to cluster {cluster} in project {project_id} after {attempts} attempts: {last_error}")]
    ConnectExhausted {
        project_id: String,
        cluster: String,
        attempts: u32,
        last_error: Box<BrokerError>,
    },

    #[error("Control plane request failed{}: {message}", status_suffix(.status))]
    ControlPlane { status: Option<u16>, message: String },

    #[error("Secure random source failed: {0}")]
    Random(String),

    #[error("Database driver error: {0}")]
    Driver(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// The driver can never handle this target; retrying cannot help.
    #[error("Unsupported connection target: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection pool is closed")]
    Closed,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl BrokerError {
    /// The cluster could not be reached. Callers usually skip the cluster
    /// instead of aborting a whole sync.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::ConnectExhausted { .. } | Self::Dial { .. } | Self::Ping { .. }
        )
    }

    /// The remote side rejected the account's privileges.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::ControlPlane { status, .. } => matches!(status, Some(401) | Some(403)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_is_unreachable_not_unauthorized() {
        let err = BrokerError::ConnectExhausted {
            project_id: "p1".to_string(),
            cluster: "c1".to_string(),
            attempts: 10,
            last_error: Box::new(BrokerError::Driver("timed out".to_string())),
        };

        assert!(err.is_unreachable());
        assert!(!err.is_unauthorized());
        assert!(err.to_string().contains("after 10 attempts: Database driver error: timed out"));
    }

    #[test]
    fn test_control_plane_status_in_message() {
        let err = BrokerError::ControlPlane {
            status: Some(403),
            message: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "Control plane request failed (HTTP 403): forbidden");
        assert!(err.is_unauthorized());

        let err = BrokerError::ControlPlane {
            status: None,
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "Control plane request failed: connection reset");
        assert!(!err.is_unauthorized());
    }
}

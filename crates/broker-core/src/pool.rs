//! Connection pool: one scoped credential per project, one verified
//! connection per cluster
//!
//! Every call to `connect` and `close` runs under a single exclusive lock,
//! held across all network waits. Calls are fully serialized, cache hits
//! included.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffPolicy, FixedBackoff};
use crate::control_plane::ControlPlane;
use crate::credential::{
    CredentialProvisioner, OsRngPasswordGenerator, PasswordGenerator, ScopedCredential,
};
use crate::driver::{ConnectOptions, ConnectionTarget, DatabaseDriver};
use crate::error::{BrokerError, Result};
use crate::proxy::ContextDialer;
use crate::resolver::ConnectionResolver;
use crate::settings::BrokerSettings;

/// Identifies one pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub project_id: String,
    pub cluster_name: String,
}

impl ClusterKey {
    pub fn new(project_id: &str, cluster_name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            cluster_name: cluster_name.to_string(),
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.cluster_name)
    }
}

struct PoolState<C> {
    /// Project ID -> credential
    credentials: HashMap<String, Arc<ScopedCredential>>,
    connections: HashMap<ClusterKey, C>,
    closed: bool,
}

impl<C> Default for PoolState<C> {
    fn default() -> Self {
        Self {
            credentials: HashMap::new(),
            connections: HashMap::new(),
            closed: false,
        }
    }
}

/// Lazily provisions credentials and connections, then hands out the
/// cached ones
pub struct ConnectionPool<D: DatabaseDriver> {
    control_plane: Arc<dyn ControlPlane>,
    provisioner: CredentialProvisioner,
    resolver: ConnectionResolver,
    driver: D,
    backoff: Arc<dyn BackoffPolicy>,
    settings: BrokerSettings,
    state: Mutex<PoolState<D::Connection>>,
}

impl<D: DatabaseDriver> ConnectionPool<D> {
    /// Create a pool with OS-random passwords and fixed, non-cancellable
    /// delays taken from `settings`
    pub fn new(control_plane: Arc<dyn ControlPlane>, driver: D, settings: BrokerSettings) -> Self {
        let provisioner = CredentialProvisioner::new(
            control_plane.clone(),
            Arc::new(OsRngPasswordGenerator),
            settings.account.clone(),
        );
        let backoff = Arc::new(FixedBackoff::from_settings(&settings.pool));

        Self {
            resolver: ConnectionResolver::new(control_plane.clone()),
            control_plane,
            provisioner,
            driver,
            backoff,
            settings,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn with_password_generator(mut self, passwords: Arc<dyn PasswordGenerator>) -> Self {
        self.provisioner = CredentialProvisioner::new(
            self.control_plane.clone(),
            passwords,
            self.settings.account.clone(),
        );
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get the credential for `project_id` and a verified connection to
    /// `cluster_name`, creating either on first use.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        cluster_name: &str,
    ) -> Result<(Arc<ScopedCredential>, D::Connection)> {
        let mut state = self.state.lock().await;

        if state.closed {
            return Err(BrokerError::Closed);
        }

        // Bad proxy settings must fail before anything is created remotely
        let dialer = self.settings.proxy.dialer().map_err(|e| {
            let message = match e {
                BrokerError::Dialer(message) => message,
                other => other.to_string(),
            };
            BrokerError::Dialer(format!(
                "cluster {} in project {}: {}",
                cluster_name, project_id, message
            ))
        })?;

        let credential = match state.credentials.get(project_id) {
            Some(credential) => credential.clone(),
            None => {
                let credential =
                    Arc::new(until_cancelled(cancel, self.provisioner.provision(project_id)).await?);
                state
                    .credentials
                    .insert(project_id.to_string(), credential.clone());
                credential
            }
        };

        let key = ClusterKey::new(project_id, cluster_name);
        if let Some(connection) = state.connections.get(&key) {
            debug!("Reusing pooled connection for {}", key);
            return Ok((credential, connection.clone()));
        }

        // Freshly created accounts take a moment to propagate to the cluster
        self.backoff.wait(cancel, 0).await?;

        let resolved =
            until_cancelled(cancel, self.resolver.resolve(project_id, cluster_name)).await?;
        if resolved.srv_fallback && dialer.is_some() {
            warn!(
                "{} only publishes an SRV connection string; its DNS lookups will not go through the proxy",
                key
            );
        }
        let options = match dialer {
            Some(_) => ConnectOptions::proxied(&self.settings.pool),
            None => ConnectOptions::direct(&self.settings.pool),
        };
        let target = ConnectionTarget::assemble(&resolved, &credential);

        info!(
            "Connecting to {} as {}{}",
            key,
            credential.username,
            if dialer.is_some() { " through proxy" } else { "" }
        );

        let connection = self
            .connect_with_retry(cancel, &key, &target, dialer, &options)
            .await?;

        state.connections.insert(key, connection.clone());
        Ok((credential, connection))
    }

    async fn connect_with_retry(
        &self,
        cancel: &CancellationToken,
        key: &ClusterKey,
        target: &ConnectionTarget,
        dialer: Option<Arc<dyn ContextDialer>>,
        options: &ConnectOptions,
    ) -> Result<D::Connection> {
        let max_attempts = self.settings.pool.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self
                .try_connect(cancel, key, target, dialer.clone(), options, attempt)
                .await
            {
                Ok(connection) => {
                    info!("Connected to {} after {} attempt(s)", key, attempt);
                    return Ok(connection);
                }
                Err(e @ (BrokerError::Cancelled | BrokerError::Unsupported(_))) => return Err(e),
                Err(e) => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, max_attempts, key, e);
                    last_error = Some(e);
                }
            }

            self.backoff.wait(cancel, attempt).await?;
        }

        error!(
            "Giving up on {} after {} attempts",
            key, max_attempts
        );
        Err(BrokerError::ConnectExhausted {
            project_id: key.project_id.clone(),
            cluster: key.cluster_name.clone(),
            attempts: max_attempts,
            last_error: Box::new(last_error.unwrap_or(BrokerError::Cancelled)),
        })
    }

    /// One dial plus ping. A connection that fails ping is disconnected
    /// before returning.
    async fn try_connect(
        &self,
        cancel: &CancellationToken,
        key: &ClusterKey,
        target: &ConnectionTarget,
        dialer: Option<Arc<dyn ContextDialer>>,
        options: &ConnectOptions,
        attempt: u32,
    ) -> Result<D::Connection> {
        let connection = until_cancelled(cancel, self.driver.connect(target, dialer, options))
            .await
            .map_err(|e| match e {
                BrokerError::Cancelled | BrokerError::Unsupported(_) => e,
                other => BrokerError::Dial {
                    project_id: key.project_id.clone(),
                    cluster: key.cluster_name.clone(),
                    attempt,
                    message: other.to_string(),
                },
            })?;

        let pinged = until_cancelled(cancel, self.driver.ping(&connection)).await;
        match pinged {
            Ok(()) => Ok(connection),
            Err(e) => {
                if let Err(disconnect_err) = self.driver.disconnect(connection).await {
                    debug!(
                        "Discarding unverified connection to {} failed: {}",
                        key, disconnect_err
                    );
                }
                Err(match e {
                    BrokerError::Cancelled | BrokerError::Unsupported(_) => e,
                    other => BrokerError::Ping {
                        project_id: key.project_id.clone(),
                        cluster: key.cluster_name.clone(),
                        attempt,
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Disconnect every pooled connection and refuse further connects.
    ///
    /// Returns the first disconnect error; the rest are logged. Once
    /// `cancel` fires, the remaining connections are dropped without a
    /// disconnect. Cached credentials are kept until the pool is dropped.
    pub async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let connections: Vec<_> = state.connections.drain().collect();
        info!("Closing pool with {} connection(s)", connections.len());

        let mut first_error = None;
        for (key, connection) in connections {
            if let Err(e) = until_cancelled(cancel, self.driver.disconnect(connection)).await {
                error!("Failed to disconnect {}: {}", key, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of pooled connections
    pub async fn len(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BrokerError::Cancelled),
        result = operation => result,
    }
}

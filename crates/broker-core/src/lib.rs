//! # broker-core
//!
//! Core of the cluster access broker:
//! - Per-project scoped database accounts that expire on their own
//! - One pooled, verified connection per (project, cluster)
//! - Optional SOCKS5 tunneling with proxy-side name resolution
//! - Bounded connect retries behind a single exclusive lock

pub mod backoff;
pub mod control_plane;
pub mod credential;
pub mod driver;
pub mod error;
pub mod proxy;
pub mod resolver;
pub mod settings;
mod pool;

pub use backoff::{BackoffPolicy, FixedBackoff};
pub use control_plane::{
    AccountAuth, ClusterMetadata, ConnectionStrings, ControlPlane, DatabaseAccount, RoleAssignment,
    ScopedAccountSpec,
};
pub use credential::{
    CredentialProvisioner, OsRngPasswordGenerator, PasswordGenerator, PasswordPolicy,
    ScopedCredential, SecretString,
};
pub use driver::{ConnectOptions, ConnectionTarget, DatabaseDriver};
pub use error::{BrokerError, Result};
pub use pool::{ClusterKey, ConnectionPool};
pub use proxy::{CancelAware, ContextDialer, Dialer, ProxyConfig, Socks5Dialer};
pub use resolver::{ConnectionResolver, ResolvedTarget, Scheme};
pub use settings::{AccountSettings, BrokerSettings, PoolSettings};

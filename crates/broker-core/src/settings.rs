//! Broker settings
//!
//! Plain JSON file, every field optional. Missing fields and a missing file
//! both fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::credential::PasswordPolicy;
use crate::error::{BrokerError, Result};
use crate::proxy::ProxyConfig;

/// Scoped account settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    /// Lifetime of provisioned accounts in seconds
    pub ttl_secs: u64,
    /// Prefix of generated usernames
    pub username_prefix: String,
    /// Leading text of the account description
    pub description_label: String,
    /// Role granted to provisioned accounts
    pub role_name: String,
    /// Database the role is defined on
    pub role_database: String,
    /// Authentication database of provisioned accounts
    pub auth_database: String,
    /// Generated password length
    pub password_length: usize,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            username_prefix: "atlas_broker_".to_string(),
            description_label: "Created by atlas-broker".to_string(),
            role_name: "readAnyDatabase".to_string(),
            role_database: "admin".to_string(),
            auth_database: "admin".to_string(),
            password_length: 30,
        }
    }
}

impl AccountSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy::with_length(self.password_length)
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Wait before the first dial so a new account can propagate
    pub warm_up_delay_ms: u64,
    /// Wait between failed attempts
    pub retry_delay_ms: u64,
    /// Dial+ping attempts per connect call
    pub max_attempts: u32,
    /// Driver connection pool size
    pub max_pool_size: u32,
    /// Idle time before a driver connection is closed
    pub max_idle_time_secs: u64,
    pub direct_connect_timeout_secs: u64,
    pub direct_server_selection_timeout_secs: u64,
    pub proxied_connect_timeout_secs: u64,
    pub proxied_server_selection_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            warm_up_delay_ms: 5_000,
            retry_delay_ms: 2_000,
            max_attempts: 10,
            max_pool_size: 10,
            max_idle_time_secs: 60,
            direct_connect_timeout_secs: 10,
            direct_server_selection_timeout_secs: 30,
            proxied_connect_timeout_secs: 60,
            proxied_server_selection_timeout_secs: 60,
        }
    }
}

impl PoolSettings {
    pub fn warm_up_delay(&self) -> Duration {
        Duration::from_millis(self.warm_up_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }
}

/// Top-level broker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Settings file version
    pub version: u32,
    pub account: AccountSettings,
    pub pool: PoolSettings,
    pub proxy: ProxyConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            version: 1,
            account: AccountSettings::default(),
            pool: PoolSettings::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl BrokerSettings {
    /// Load settings from a JSON file, using defaults if it does not exist.
    ///
    /// Not validated here: the proxy password is never stored in the file
    /// and usually arrives later from the environment. Call `validate`
    /// once every source has been applied.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;

        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to a JSON file. The proxy password is left out.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        // Write atomically using temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, path).await?;

        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_attempts == 0 {
            return Err(BrokerError::InvalidSettings(
                "pool.maxAttempts must be at least 1".to_string(),
            ));
        }

        if self.account.password_length < 8 {
            return Err(BrokerError::InvalidSettings(format!(
                "account.passwordLength must be at least 8, got {}",
                self.account.password_length
            )));
        }

        if self.account.ttl_secs == 0 {
            return Err(BrokerError::InvalidSettings(
                "account.ttlSecs must be positive".to_string(),
            ));
        }

        self.proxy
            .credentials()
            .map_err(|e| BrokerError::InvalidSettings(format!("proxy: {}", e)))?;

        // A proxied handshake has more hops than a direct one
        let pool = &self.pool;
        if pool.proxied_connect_timeout_secs <= pool.direct_connect_timeout_secs
            || pool.proxied_server_selection_timeout_secs
                <= pool.direct_server_selection_timeout_secs
        {
            return Err(BrokerError::InvalidSettings(
                "proxied timeouts must be larger than direct timeouts".to_string(),
            ));
        }

        Ok(())
    }
}

//! Proxy configuration and dialer factory

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use super::dialer::{CancelAware, ContextDialer, Socks5Dialer};
use crate::credential::SecretString;
use crate::error::{BrokerError, Result};

/// SOCKS5 proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    /// Proxy host (empty = disabled)
    pub host: String,
    /// Proxy port (0 = disabled)
    pub port: u16,
    /// Username for RFC 1929 authentication
    pub username: Option<String>,
    /// Password for RFC 1929 authentication; never written back out
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
}

impl ProxyConfig {
    /// Create an unauthenticated proxy config
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: None,
            password: None,
        }
    }

    /// Add username/password authentication
    pub fn with_auth(mut self, username: &str, password: SecretString) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password);
        self
    }

    /// Whether traffic should go through the proxy
    pub fn enabled(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy credentials, if both halves are configured
    pub fn credentials(&self) -> Result<Option<(&str, &SecretString)>> {
        let username = self.username.as_deref().filter(|u| !u.is_empty());
        let password = self.password.as_ref().filter(|p| !p.is_empty());

        match (username, password) {
            (Some(user), Some(pass)) => Ok(Some((user, pass))),
            (None, None) => Ok(None),
            _ => Err(BrokerError::Dialer(
                "proxy username and password must be set together".to_string(),
            )),
        }
    }

    /// Build the dialer for database connections.
    ///
    /// Returns `None` when the proxy is disabled, meaning connections go
    /// direct. Callers that receive a dialer must use the longer proxied
    /// timeouts.
    pub fn dialer(&self) -> Result<Option<Arc<dyn ContextDialer>>> {
        if !self.enabled() {
            return Ok(None);
        }

        let credentials = self
            .credentials()?
            .map(|(user, pass)| (user.to_string(), pass.clone()));

        let socks = Socks5Dialer::new(self.address(), credentials);
        Ok(Some(Arc::new(CancelAware::new(socks))))
    }

    /// `socks5h://` URL for HTTP clients; the `h` makes the proxy resolve
    /// host names. Returns `None` when the proxy is disabled.
    pub fn proxy_url(&self) -> Result<Option<Url>> {
        if !self.enabled() {
            return Ok(None);
        }

        let mut url = Url::parse(&format!("socks5h://{}", self.address()))
            .map_err(|e| BrokerError::Dialer(format!("invalid proxy address: {}", e)))?;

        if let Some((user, pass)) = self.credentials()? {
            url.set_username(user)
                .map_err(|_| BrokerError::Dialer("proxy URL rejects a username".to_string()))?;
            url.set_password(Some(pass.expose()))
                .map_err(|_| BrokerError::Dialer("proxy URL rejects a password".to_string()))?;
        }

        Ok(Some(url))
    }
}

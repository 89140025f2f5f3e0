//! Dialers handed to database drivers

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::socks5::Socks5Client;
use crate::credential::SecretString;

/// Opens TCP streams to `host:port`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<TcpStream>;
}

/// Dialer that gives up as soon as the caller's token is cancelled.
#[async_trait]
pub trait ContextDialer: Send + Sync + std::fmt::Debug {
    async fn dial_context(
        &self,
        cancel: &CancellationToken,
        host: &str,
        port: u16,
    ) -> io::Result<TcpStream>;
}

/// Makes any `Dialer` cancellation-aware by racing it against the token.
#[derive(Debug)]
pub struct CancelAware<D> {
    inner: D,
}

impl<D> CancelAware<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: Dialer + std::fmt::Debug> ContextDialer for CancelAware<D> {
    async fn dial_context(
        &self,
        cancel: &CancellationToken,
        host: &str,
        port: u16,
    ) -> io::Result<TcpStream> {
        tokio::select! {
            _ = cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("dial to {}:{} cancelled", host, port),
            )),
            result = self.inner.dial(host, port) => result,
        }
    }
}

/// Dialer that tunnels every connection through a SOCKS5 proxy.
///
/// Not cancellation-aware on its own; wrap it in `CancelAware`.
pub struct Socks5Dialer {
    proxy_address: String,
    credentials: Option<(String, SecretString)>,
    /// Bound on proxy connect plus handshake
    timeout: Duration,
}

impl Socks5Dialer {
    /// Default bound on reaching the proxy and finishing the handshake
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(proxy_address: String, credentials: Option<(String, SecretString)>) -> Self {
        Self {
            proxy_address,
            credentials,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn tunnel(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.proxy_address).await?;
        stream.set_nodelay(true)?;

        let credentials = self
            .credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.expose()));

        Socks5Client::new(stream)
            .handshake(credentials, host, port)
            .await
    }
}

impl std::fmt::Debug for Socks5Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Dialer")
            .field("proxy_address", &self.proxy_address)
            .field("authenticated", &self.credentials.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        debug!(
            "Dialing {}:{} through SOCKS5 proxy {}",
            host, port, self.proxy_address
        );

        match tokio::time::timeout(self.timeout, self.tunnel(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "SOCKS5 proxy {} did not open {}:{} within {:?}",
                    self.proxy_address, host, port, self.timeout
                ),
            )),
        }
    }
}

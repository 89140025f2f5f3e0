//! Reachability-only database driver
//!
//! Opens plain TCP connections to the seed hosts, directly or through the
//! supplied dialer. It speaks no wire protocol, so "ping" means a fresh
//! TCP handshake with at least one seed within the server selection
//! timeout.

use async_trait::async_trait;
use broker_core::{
    BrokerError, ConnectOptions, ConnectionTarget, ContextDialer, DatabaseDriver, Result, Scheme,
};
use futures::future::{select_ok, BoxFuture};
use futures::FutureExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_PORT: u16 = 27017;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seed {
    host: String,
    port: u16,
}

impl std::fmt::Display for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_seed(raw: &str) -> Result<Seed> {
    let invalid = || BrokerError::Driver(format!("invalid seed host: {}", raw));

    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        (host, tail.strip_prefix(':'))
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };

    Ok(Seed {
        host: host.to_string(),
        port,
    })
}

struct ProbeState {
    seeds: Vec<Seed>,
    dialer: Option<Arc<dyn ContextDialer>>,
    selection_timeout: Duration,
    /// Cancelled on disconnect so in-flight dials stop
    cancel: CancellationToken,
    streams: Mutex<Vec<TcpStream>>,
}

impl ProbeState {
    async fn dial(&self, seed: &Seed, timeout: Duration) -> io::Result<TcpStream> {
        let dialed = async {
            match &self.dialer {
                Some(dialer) => dialer.dial_context(&self.cancel, &seed.host, seed.port).await,
                None => TcpStream::connect((seed.host.as_str(), seed.port)).await,
            }
        };

        match tokio::time::timeout(timeout, dialed).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not answer within {:?}", seed, timeout),
            )),
        }
    }

    /// First seed to accept a connection wins
    async fn dial_any(&self, timeout: Duration) -> io::Result<(Seed, TcpStream)> {
        let attempts: Vec<BoxFuture<'_, io::Result<(Seed, TcpStream)>>> = self
            .seeds
            .iter()
            .map(|seed| {
                async move {
                    let stream = self.dial(seed, timeout).await?;
                    Ok((seed.clone(), stream))
                }
                .boxed()
            })
            .collect();

        let ((seed, stream), _pending) = select_ok(attempts).await?;
        Ok((seed, stream))
    }
}

/// Handle to the streams opened for one target
#[derive(Clone)]
pub struct ProbeConnection {
    state: Arc<ProbeState>,
}

impl ProbeConnection {
    pub fn seeds(&self) -> Vec<String> {
        self.state.seeds.iter().map(Seed::to_string).collect()
    }

    pub fn is_proxied(&self) -> bool {
        self.state.dialer.is_some()
    }
}

impl std::fmt::Debug for ProbeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConnection")
            .field("seeds", &self.seeds())
            .field("proxied", &self.is_proxied())
            .finish()
    }
}

/// `DatabaseDriver` that checks TCP reachability of seed hosts
#[derive(Debug, Default)]
pub struct TcpProbeDriver;

#[async_trait]
impl DatabaseDriver for TcpProbeDriver {
    type Connection = ProbeConnection;

    async fn connect(
        &self,
        target: &ConnectionTarget,
        dialer: Option<Arc<dyn ContextDialer>>,
        options: &ConnectOptions,
    ) -> Result<ProbeConnection> {
        if target.scheme == Scheme::Srv {
            return Err(BrokerError::Unsupported(format!(
                "{} needs an SRV lookup, which a plain TCP check cannot perform",
                target.redacted()
            )));
        }

        let seeds = target
            .host_list()
            .iter()
            .map(|raw| parse_seed(raw))
            .collect::<Result<Vec<_>>>()?;
        if seeds.is_empty() {
            return Err(BrokerError::Driver(format!(
                "{} lists no hosts",
                target.redacted()
            )));
        }

        debug!("Probing {}", target.redacted());

        let state = Arc::new(ProbeState {
            seeds,
            dialer,
            selection_timeout: options.server_selection_timeout,
            cancel: CancellationToken::new(),
            streams: Mutex::new(Vec::new()),
        });

        let (seed, stream) = state
            .dial_any(options.connect_timeout)
            .await
            .map_err(|e| BrokerError::Driver(format!("no seed host reachable: {}", e)))?;
        info!("Opened TCP connection to {}", seed);
        state.streams.lock().await.push(stream);

        Ok(ProbeConnection { state })
    }

    async fn ping(&self, connection: &ProbeConnection) -> Result<()> {
        let state = &connection.state;
        let (seed, stream) = state
            .dial_any(state.selection_timeout)
            .await
            .map_err(|e| BrokerError::Driver(format!("no seed host answered: {}", e)))?;
        debug!("{} answered", seed);
        state.streams.lock().await.push(stream);
        Ok(())
    }

    async fn disconnect(&self, connection: ProbeConnection) -> Result<()> {
        let state = connection.state;
        state.cancel.cancel();

        let streams: Vec<_> = state.streams.lock().await.drain(..).collect();
        let mut first_error = None;
        for mut stream in streams {
            if let Err(e) = stream.shutdown().await {
                // The peer closing first is not a failure
                if e.kind() != io::ErrorKind::NotConnected && first_error.is_none() {
                    first_error = Some(BrokerError::IoError(e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{
        DatabaseAccount, PoolSettings, ResolvedTarget, ScopedCredential, SecretString,
    };
    use chrono::Utc;
    use tokio::net::TcpListener;

    fn target(scheme: Scheme, hosts: &str) -> ConnectionTarget {
        let credential = ScopedCredential {
            username: "atlas_broker_PROBE00001".to_string(),
            password: SecretString::from("pw"),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            owner_project_id: "p1".to_string(),
            account: DatabaseAccount::default(),
        };
        let resolved = ResolvedTarget {
            scheme,
            hosts: hosts.to_string(),
            srv_fallback: scheme == Scheme::Srv,
        };
        ConnectionTarget::assemble(&resolved, &credential)
    }

    fn options() -> ConnectOptions {
        let mut options = ConnectOptions::direct(&PoolSettings::default());
        options.connect_timeout = Duration::from_secs(2);
        options.server_selection_timeout = Duration::from_secs(2);
        options
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(
            parse_seed("db.example.net:27018").unwrap(),
            Seed {
                host: "db.example.net".to_string(),
                port: 27018
            }
        );
        assert_eq!(parse_seed("db.example.net").unwrap().port, 27017);
        assert_eq!(parse_seed("[fd00::1]:27019").unwrap().host, "fd00::1");
        assert_eq!(parse_seed("[fd00::1]").unwrap().port, 27017);
        assert!(parse_seed("db:notaport").is_err());
        assert!(parse_seed(":27017").is_err());
    }

    #[tokio::test]
    async fn test_connect_ping_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    drop(stream);
                });
            }
        });

        let driver = TcpProbeDriver;
        let target = target(Scheme::Standard, &format!("{}/?ssl=true", addr));

        let connection = driver.connect(&target, None, &options()).await.unwrap();
        assert!(!connection.is_proxied());
        assert_eq!(connection.seeds(), vec![addr.to_string()]);

        driver.ping(&connection).await.unwrap();
        assert_eq!(connection.state.streams.lock().await.len(), 2);

        driver.disconnect(connection.clone()).await.unwrap();
        assert!(connection.state.streams.lock().await.is_empty());
        assert!(connection.state.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_rejects_srv() {
        let err = TcpProbeDriver
            .connect(&target(Scheme::Srv, "host1,host2"), None, &options())
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Unsupported(_)));
        let message = err.to_string();
        assert!(message.contains("SRV"));
        assert!(!message.contains("pw@"));
    }

    #[tokio::test]
    async fn test_unreachable_seeds_fail() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpProbeDriver
            .connect(&target(Scheme::Standard, &addr.to_string()), None, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Driver(_)));
    }
}

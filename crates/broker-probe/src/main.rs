//! Atlas broker probe
//!
//! Provisions a scoped database account in a project, resolves a cluster
//! and checks it answers: a MongoDB ping when connecting directly, TCP
//! reachability of its hosts through a SOCKS5 proxy. Useful for verifying proxy and API credentials before wiring the
//! broker into a service.

mod mongo;
mod tcp_probe;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atlas_admin::{AdminAuth, AtlasAdminClient, DEFAULT_BASE_URL};
use broker_core::{BrokerSettings, ConnectionPool, DatabaseDriver, SecretString};
use mongo::MongoDriver;
use tcp_probe::TcpProbeDriver;

/// Upper bound on disconnecting pooled connections at exit
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DriverKind {
    /// mongo when connecting directly, tcp through a proxy
    Auto,
    /// MongoDB wire protocol; direct connections only
    Mongo,
    /// TCP reachability of the seed hosts
    Tcp,
}

impl DriverKind {
    /// The mongodb crate cannot dial through the proxy
    fn resolve(self, proxied: bool) -> Self {
        match self {
            DriverKind::Auto if proxied => DriverKind::Tcp,
            DriverKind::Auto => DriverKind::Mongo,
            other => other,
        }
    }
}

/// Atlas broker probe - provision a scoped account and verify cluster reachability
#[derive(Parser, Debug)]
#[command(name = "atlas-broker-probe")]
#[command(version)]
#[command(about = "Provision a short-lived Atlas database account and verify a cluster is reachable")]
struct Args {
    /// Settings file (JSON); defaults are used when it does not exist
    #[arg(long, env = "ATLAS_BROKER_SETTINGS", default_value = "atlas-broker.json")]
    settings: PathBuf,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    write_default_settings: bool,

    /// Project (group) ID
    #[arg(long, env = "ATLAS_PROJECT_ID")]
    project_id: Option<String>,

    /// Cluster name
    #[arg(long, env = "ATLAS_CLUSTER")]
    cluster: Option<String>,

    /// Admin API base URL
    #[arg(long, env = "ATLAS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Service account client ID
    #[arg(long, env = "ATLAS_CLIENT_ID")]
    client_id: Option<String>,

    /// Service account client secret
    #[arg(long, env = "ATLAS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Pre-issued access token, used instead of a service account
    #[arg(long, env = "ATLAS_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Programmatic API public key (digest auth)
    #[arg(long, env = "ATLAS_PUBLIC_KEY")]
    public_key: Option<String>,

    /// Programmatic API private key
    #[arg(long, env = "ATLAS_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// How cluster connections are verified
    #[arg(long, value_enum, default_value_t = DriverKind::Auto)]
    driver: DriverKind,

    /// SOCKS5 proxy host (overrides the settings file)
    #[arg(long, env = "ATLAS_PROXY_HOST")]
    proxy_host: Option<String>,

    /// SOCKS5 proxy port
    #[arg(long, env = "ATLAS_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// SOCKS5 proxy username
    #[arg(long, env = "ATLAS_PROXY_USER")]
    proxy_user: Option<String>,

    /// SOCKS5 proxy password
    #[arg(long, env = "ATLAS_PROXY_PASS", hide_env_values = true)]
    proxy_pass: Option<String>,
}

impl Args {
    /// Layer proxy flags over the file settings
    fn apply_overrides(&self, settings: &mut BrokerSettings) {
        if let Some(host) = &self.proxy_host {
            settings.proxy.host = host.clone();
        }
        if let Some(port) = self.proxy_port {
            settings.proxy.port = port;
        }
        if let Some(user) = &self.proxy_user {
            settings.proxy.username = Some(user.clone());
        }
        if let Some(pass) = &self.proxy_pass {
            settings.proxy.password = Some(SecretString::from(pass.as_str()));
        }
    }

    fn auth(&self) -> anyhow::Result<AdminAuth> {
        if let Some(token) = &self.access_token {
            return Ok(AdminAuth::Bearer(SecretString::from(token.as_str())));
        }

        if let (Some(public_key), Some(private_key)) = (&self.public_key, &self.private_key) {
            return Ok(AdminAuth::ApiKey {
                public_key: public_key.clone(),
                private_key: SecretString::from(private_key.as_str()),
            });
        }

        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(AdminAuth::ServiceAccount {
                client_id: client_id.clone(),
                client_secret: SecretString::from(client_secret.as_str()),
            }),
            _ => bail!(
                "One of --access-token, --public-key with --private-key, or --client-id with --client-secret is required"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut settings = BrokerSettings::load(&args.settings)
        .with_context(|| format!("Failed to load settings from {}", args.settings.display()))?;
    args.apply_overrides(&mut settings);
    settings.validate().context("Invalid settings")?;

    if args.write_default_settings {
        settings
            .save(&args.settings)
            .await
            .with_context(|| format!("Failed to write {}", args.settings.display()))?;
        info!("Wrote settings to {}", args.settings.display());
        return Ok(());
    }

    let (Some(project_id), Some(cluster)) = (args.project_id.as_deref(), args.cluster.as_deref())
    else {
        bail!("--project-id and --cluster are required");
    };

    let client = AtlasAdminClient::new(&args.base_url, args.auth()?, &settings.proxy)
        .context("Failed to create Atlas API client")?;

    let proxied = settings.proxy.enabled();
    if proxied {
        info!("Using SOCKS5 proxy {}", settings.proxy.address());
    }

    match args.driver.resolve(proxied) {
        DriverKind::Mongo => {
            run(client, MongoDriver, settings, project_id, cluster, |connection| {
                vec![("Hosts", connection.hosts().join(", "))]
            })
            .await
        }
        _ => {
            run(client, TcpProbeDriver, settings, project_id, cluster, |connection| {
                vec![
                    ("Hosts", connection.seeds().join(", ")),
                    ("Proxied", connection.is_proxied().to_string()),
                ]
            })
            .await
        }
    }
}

/// Connect once through a fresh pool, close it and print what was verified
async fn run<D: DatabaseDriver>(
    client: AtlasAdminClient,
    driver: D,
    settings: BrokerSettings,
    project_id: &str,
    cluster: &str,
    describe: impl Fn(&D::Connection) -> Vec<(&'static str, String)>,
) -> anyhow::Result<()> {
    let pool = ConnectionPool::new(Arc::new(client), driver, settings);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = pool.connect(&cancel, project_id, cluster).await;

    // Separate token: an interrupted connect still gets its disconnects
    let closing = CancellationToken::new();
    let deadline = closing.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CLOSE_TIMEOUT).await;
        deadline.cancel();
    });
    if let Err(e) = pool.close(&closing).await {
        warn!("Failed to close connections: {}", e);
    }

    let (credential, connection) = match outcome {
        Ok(connected) => connected,
        Err(e) if e.is_unreachable() => {
            return Err(e).context(format!("Cluster {} is unreachable", cluster));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{:<12}{}", "Cluster:", cluster);
    for (label, value) in describe(&connection) {
        println!("{:<12}{}", format!("{}:", label), value);
    }
    println!("{:<12}{}", "Account:", credential.username);
    println!("{:<12}{}", "Expires at:", credential.expires_at.to_rfc3339());

    Ok(())
}

//! MongoDB wire-protocol driver
//!
//! Connects with the official `mongodb` crate and pings `admin`. The crate
//! opens its own sockets and offers no hook for a custom dialer, so this
//! driver only serves direct connections: handed a dialer, it refuses with
//! `BrokerError::Unsupported` instead of silently bypassing the proxy.

use async_trait::async_trait;
use broker_core::{
    BrokerError, ConnectOptions, ConnectionTarget, ContextDialer, DatabaseDriver, Result,
};
use mongodb::bson::doc;
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::sync::Arc;
use tracing::{debug, info};

const APP_NAME: &str = "atlas-broker";

/// Pooled client for one cluster
#[derive(Clone)]
pub struct MongoConnection {
    client: Client,
    hosts: Vec<String>,
}

impl MongoConnection {
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl std::fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnection")
            .field("hosts", &self.hosts)
            .finish()
    }
}

fn driver_error(e: mongodb::error::Error) -> BrokerError {
    match *e.kind {
        ErrorKind::Authentication { .. } => BrokerError::Unauthorized(e.to_string()),
        _ => BrokerError::Driver(e.to_string()),
    }
}

/// Parse `target` and apply the pool's limits and timeouts
async fn client_options(
    target: &ConnectionTarget,
    options: &ConnectOptions,
) -> Result<ClientOptions> {
    // Parse errors may echo the URI, secret included
    let mut parsed = ClientOptions::parse(target.uri()).await.map_err(|_| {
        BrokerError::Driver(format!("invalid connection string {}", target.redacted()))
    })?;

    parsed.app_name = Some(APP_NAME.to_string());
    parsed.max_pool_size = Some(options.max_pool_size);
    parsed.max_idle_time = Some(options.max_idle_time);
    parsed.connect_timeout = Some(options.connect_timeout);
    parsed.server_selection_timeout = Some(options.server_selection_timeout);
    Ok(parsed)
}

/// `DatabaseDriver` backed by the `mongodb` crate
#[derive(Debug, Default)]
pub struct MongoDriver;

#[async_trait]
impl DatabaseDriver for MongoDriver {
    type Connection = MongoConnection;

    async fn connect(
        &self,
        target: &ConnectionTarget,
        dialer: Option<Arc<dyn ContextDialer>>,
        options: &ConnectOptions,
    ) -> Result<MongoConnection> {
        if dialer.is_some() {
            return Err(BrokerError::Unsupported(format!(
                "{} must go through the proxy, which the mongodb driver cannot dial through",
                target.redacted()
            )));
        }

        let parsed = client_options(target, options).await?;
        let hosts = parsed.hosts.iter().map(ToString::to_string).collect();
        let client = Client::with_options(parsed).map_err(driver_error)?;

        debug!("Created MongoDB client for {}", target.redacted());
        Ok(MongoConnection { client, hosts })
    }

    async fn ping(&self, connection: &MongoConnection) -> Result<()> {
        connection
            .client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(driver_error)?;
        info!("{} answered ping", connection.hosts.join(","));
        Ok(())
    }

    async fn disconnect(&self, connection: MongoConnection) -> Result<()> {
        connection.client.shutdown().await;
        Ok(())
    }
}

//! MongoDB driver implementation

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{
    ClientOptions, Credential, ReadPreference, SelectionCriteria, ServerAddress, Tls, TlsOptions,
};
use mongodb::{Client, Database};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::db::connection::{ConnectionType, Credentials, AUTHENTICATION, URI};
use crate::db::driver::{ConnectionInfo, Provider};
use crate::db::error::{DataError, Result};

const BACKEND: &str = "MongoDB";

/// Pool and socket limits applied to every MongoDB client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    pub min_size: u32,
    pub max_size: u32,
    pub max_idle: Duration,
    /// Not exposed by the Rust driver; recorded for parity with other clients
    pub max_lifetime: Duration,
    /// Applied as the server selection timeout
    pub max_wait: Duration,
    pub connect_timeout: Duration,
    /// Not exposed by the Rust driver
    pub read_timeout: Duration,
}

pub const POOL_POLICY: PoolPolicy = PoolPolicy {
    min_size: 1,
    max_size: 30,
    max_idle: Duration::from_secs(10 * 60),
    max_lifetime: Duration::from_secs(30 * 60),
    max_wait: Duration::from_secs(5 * 60),
    connect_timeout: Duration::from_secs(30),
    read_timeout: Duration::from_secs(30),
};

/// Build client options from credentials.
///
/// `properties["uri"]` wins over the discrete host, port and credential
/// fields. Pool limits, TLS, retryable writes and read preference are applied
/// either way.
pub async fn client_options(credentials: &Credentials) -> Result<ClientOptions> {
    let mut options = match credentials.property(URI) {
        Some(uri) => ClientOptions::parse(uri)
            .await
            .map_err(|e| DataError::InvalidConnectionString(e.to_string()))?,
        None => {
            let address = format!("{}:{}", credentials.hostname(), credentials.port());
            let host = ServerAddress::parse(&address)
                .map_err(|e| DataError::InvalidConnectionString(e.to_string()))?;

            let mut options = ClientOptions::default();
            options.hosts = vec![host];

            if !credentials.username().is_empty() {
                let mut credential = Credential::default();
                credential.username = Some(credentials.username().to_string());
                credential.password = Some(credentials.password().to_string());
                credential.source = credentials.property(AUTHENTICATION).map(str::to_string);
                options.credential = Some(credential);
            }

            options
        }
    };

    apply_policy(&mut options, credentials.ssl());
    Ok(options)
}

fn apply_policy(options: &mut ClientOptions, ssl: bool) {
    options.min_pool_size = Some(POOL_POLICY.min_size);
    options.max_pool_size = Some(POOL_POLICY.max_size);
    options.max_idle_time = Some(POOL_POLICY.max_idle);
    options.connect_timeout = Some(POOL_POLICY.connect_timeout);
    options.server_selection_timeout = Some(POOL_POLICY.max_wait);
    options.retry_writes = Some(true);
    options.selection_criteria = Some(SelectionCriteria::ReadPreference(
        ReadPreference::PrimaryPreferred {
            options: Default::default(),
        },
    ));

    if ssl {
        options.tls = Some(Tls::Enabled(TlsOptions::default()));
    }
}

pub struct MongoProvider {
    client: Client,
    database: Database,
    connection_type: ConnectionType,
    closed: AtomicBool,
}

impl MongoProvider {
    /// Build the client. The driver connects lazily, so an unreachable server
    /// surfaces on the first operation or on [`Provider::ping`].
    pub async fn connect(credentials: Credentials, connection_type: ConnectionType) -> Result<Self> {
        let options = client_options(&credentials)
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;
        debug!(
            hosts = ?options.hosts,
            database = credentials.database(),
            tls = credentials.ssl(),
            "Building MongoDB client"
        );

        let client = Client::with_options(options).map_err(|e| DataError::connection(BACKEND, e))?;
        let database = client.database(credentials.database());
        info!(database = credentials.database(), %connection_type, "MongoDB provider ready");

        Ok(Self {
            client,
            database,
            connection_type,
            closed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> Result<&Client> {
        self.ensure_open()?;
        Ok(&self.client)
    }

    pub fn database(&self) -> Result<&Database> {
        self.ensure_open()?;
        Ok(&self.database)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::Closed(BACKEND));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MongoProvider {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    async fn ping(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();
        let db = self.client()?.database("admin");

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;

        let server_info = db
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;

        let version = server_info
            .get_str("version")
            .ok()
            .map(|v| format!("MongoDB {}", v));

        Ok(ConnectionInfo {
            server_version: version,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DataError::shutdown(BACKEND, "provider already shut down"));
        }
        self.client.clone().shutdown().await;
        info!("MongoDB provider shut down");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::builder()
            .hostname("localhost")
            .port(27017)
            .database("testdb")
            .username("app")
            .password("secret")
            .property(AUTHENTICATION, "admin")
            .driver("mongodb")
            .build()
    }

    #[tokio::test]
    async fn discrete_fields_build_single_host_with_credential() {
        let options = client_options(&credentials()).await.unwrap();

        assert_eq!(options.hosts.len(), 1);
        assert_eq!(options.hosts[0].to_string(), "localhost:27017");

        let credential = options.credential.expect("credential");
        assert_eq!(credential.username.as_deref(), Some("app"));
        assert_eq!(credential.password.as_deref(), Some("secret"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn pool_policy_is_applied() {
        let options = client_options(&credentials()).await.unwrap();

        assert_eq!(options.min_pool_size, Some(1));
        assert_eq!(options.max_pool_size, Some(30));
        assert_eq!(options.max_idle_time, Some(Duration::from_secs(600)));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(300)));
        assert_eq!(options.retry_writes, Some(true));
        assert!(matches!(
            options.selection_criteria,
            Some(SelectionCriteria::ReadPreference(ReadPreference::PrimaryPreferred { .. }))
        ));
        assert!(options.tls.is_none());
    }

    #[tokio::test]
    async fn uri_property_overrides_discrete_fields() {
        let credentials = Credentials::builder()
            .hostname("ignored")
            .port(1)
            .database("testdb")
            .ssl(true)
            .property(URI, "mongodb://db1.local:27018,db2.local:27019/?replicaSet=rs0")
            .build();

        let options = client_options(&credentials).await.unwrap();
        assert_eq!(options.hosts.len(), 2);
        assert_eq!(options.repl_set_name.as_deref(), Some("rs0"));
        assert_eq!(options.max_pool_size, Some(30));
        assert!(matches!(options.tls, Some(Tls::Enabled(_))));
    }

    #[tokio::test]
    async fn malformed_uri_fails_to_connect() {
        let credentials = Credentials::builder()
            .property(URI, "postgres://not-mongo")
            .build();

        let err = MongoProvider::connect(credentials, ConnectionType::Local)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::FailedConnection { backend: "MongoDB", .. }));
    }

    #[tokio::test]
    async fn lifecycle_flips_closed_flag() {
        let provider = MongoProvider::connect(credentials(), ConnectionType::Local)
            .await
            .unwrap();
        assert!(!provider.is_closed());
        assert_eq!(provider.database().unwrap().name(), "testdb");

        provider.shutdown().await.unwrap();
        assert!(provider.is_closed());
        assert!(matches!(provider.database(), Err(DataError::Closed("MongoDB"))));
        assert!(matches!(
            provider.shutdown().await,
            Err(DataError::FailedShutdown { .. })
        ));
    }
}

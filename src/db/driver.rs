use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::connection::{ConnectionType, Credentials, MessengerDriver, StorageDriver};
use super::dao::{Record, StorageDao};
use super::error::{DataError, Result};
use crate::json::JsonAdapter;

/// Information returned from a successful liveness probe
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub server_version: Option<String>,
    pub latency_ms: u64,
}

/// Core trait for a live connection (client or pool) to one backend instance.
///
/// Providers are returned already connected by their `connect` constructor,
/// so there is no "not yet initialised" state to guard against. After
/// [`Provider::shutdown`] every accessor fails with [`DataError::Closed`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Display name of the backend
    fn backend(&self) -> &'static str;

    fn connection_type(&self) -> ConnectionType;

    /// Round-trip to the server
    async fn ping(&self) -> Result<ConnectionInfo>;

    /// Release the client or pool. A second call fails.
    async fn shutdown(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Relational providers expose a minimal string-parameter query surface,
/// enough for the key/value DAO to run on any of them.
#[async_trait]
pub trait SqlProvider: Provider {
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Run a statement and return the number of affected rows
    async fn execute(&self, statement: &str, params: Vec<String>) -> Result<u64>;

    /// Run a query and collect its first column as strings
    async fn query_strings(&self, statement: &str, params: Vec<String>) -> Result<Vec<String>>;

    /// Run a query whose first column of the first row is a count
    async fn query_count(&self, statement: &str, params: Vec<String>) -> Result<u64>;
}

/// A message received from a broker channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// A live subscription to one channel
pub struct Subscription {
    channel: String,
    stream: BoxStream<'static, Message>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, stream: BoxStream<'static, Message>) -> Self {
        Self {
            channel: channel.into(),
            stream,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. `None` once the broker connection is gone.
    pub async fn next(&mut self) -> Option<Message> {
        self.stream.next().await
    }

    pub async fn next_json<T: DeserializeOwned>(&mut self) -> Option<Result<T>> {
        let message = self.next().await?;
        Some(JsonAdapter.deserialize(&message.payload))
    }
}

/// Broker providers publish to and subscribe on named channels
#[async_trait]
pub trait Messenger: Provider {
    /// Publish a payload, returning how many subscribers received it
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// JSON helpers for any [`Messenger`], trait objects included
#[async_trait]
pub trait MessengerExt: Messenger {
    async fn publish_json<T: Serialize + Sync>(&self, channel: &str, value: &T) -> Result<u64> {
        let payload = JsonAdapter.serialize(value)?;
        self.publish(channel, &payload).await
    }
}

impl<M: Messenger + ?Sized> MessengerExt for M {}

/// A connected storage provider, one variant per compiled-in backend
pub enum StorageProvider {
    #[cfg(feature = "mongodb")]
    MongoDB(super::drivers::mongo::MongoProvider),
    #[cfg(feature = "mysql")]
    MySQL(super::drivers::mysql::MySqlProvider),
    #[cfg(feature = "sqlite-driver")]
    SQLite(super::drivers::sqlite::SqliteProvider),
}

impl StorageProvider {
    pub fn driver(&self) -> StorageDriver {
        match self {
            #[cfg(feature = "mongodb")]
            StorageProvider::MongoDB(_) => StorageDriver::MongoDB,
            #[cfg(feature = "mysql")]
            StorageProvider::MySQL(_) => StorageDriver::MySQL,
            #[cfg(feature = "sqlite-driver")]
            StorageProvider::SQLite(_) => StorageDriver::SQLite,
        }
    }

    fn as_provider(&self) -> &dyn Provider {
        match self {
            #[cfg(feature = "mongodb")]
            StorageProvider::MongoDB(p) => p,
            #[cfg(feature = "mysql")]
            StorageProvider::MySQL(p) => p,
            #[cfg(feature = "sqlite-driver")]
            StorageProvider::SQLite(p) => p,
        }
    }

    #[cfg(feature = "mongodb")]
    pub fn into_mongo(self) -> Result<super::drivers::mongo::MongoProvider> {
        match self {
            StorageProvider::MongoDB(p) => Ok(p),
            #[allow(unreachable_patterns)]
            other => Err(mismatch(other.driver(), StorageDriver::MongoDB)),
        }
    }

    #[cfg(feature = "mysql")]
    pub fn into_mysql(self) -> Result<super::drivers::mysql::MySqlProvider> {
        match self {
            StorageProvider::MySQL(p) => Ok(p),
            #[allow(unreachable_patterns)]
            other => Err(mismatch(other.driver(), StorageDriver::MySQL)),
        }
    }

    #[cfg(feature = "sqlite-driver")]
    pub fn into_sqlite(self) -> Result<super::drivers::sqlite::SqliteProvider> {
        match self {
            StorageProvider::SQLite(p) => Ok(p),
            #[allow(unreachable_patterns)]
            other => Err(mismatch(other.driver(), StorageDriver::SQLite)),
        }
    }

    /// Wrap the provider in the DAO matching its backend.
    /// The DAO still needs `create_table` before any read or write.
    pub fn into_dao<T: Record>(self) -> Box<dyn StorageDao<T>> {
        use std::sync::Arc;

        match self {
            #[cfg(feature = "mongodb")]
            StorageProvider::MongoDB(p) => Box::new(super::dao::mongo::MongoDao::new(Arc::new(p))),
            #[cfg(feature = "mysql")]
            StorageProvider::MySQL(p) => Box::new(super::dao::sql::SqlDao::new(Arc::new(p))),
            #[cfg(feature = "sqlite-driver")]
            StorageProvider::SQLite(p) => Box::new(super::dao::sql::SqlDao::new(Arc::new(p))),
        }
    }
}

#[allow(dead_code)]
fn mismatch(actual: StorageDriver, wanted: StorageDriver) -> DataError {
    DataError::Dao(format!(
        "provider is {}, not {}",
        actual.name(),
        wanted.name()
    ))
}

#[async_trait]
impl Provider for StorageProvider {
    fn backend(&self) -> &'static str {
        self.as_provider().backend()
    }

    fn connection_type(&self) -> ConnectionType {
        self.as_provider().connection_type()
    }

    async fn ping(&self) -> Result<ConnectionInfo> {
        self.as_provider().ping().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.as_provider().shutdown().await
    }

    fn is_closed(&self) -> bool {
        self.as_provider().is_closed()
    }
}

fn driver_name(credentials: &Credentials) -> Result<&str> {
    credentials
        .driver()
        .filter(|name| !name.trim().is_empty())
        .ok_or(DataError::MissingProperty(super::connection::DRIVER))
}

/// Factory function - creates the right storage provider based on the
/// `driver` property. Unknown names fail before anything is opened.
pub async fn connect_storage(
    credentials: Credentials,
    connection_type: ConnectionType,
) -> Result<StorageProvider> {
    let driver: StorageDriver = driver_name(&credentials)?.parse()?;
    if !driver.is_available() {
        return Err(DataError::DriverNotAvailable(driver.feature_name()));
    }
    debug!(driver = driver.name(), %connection_type, "Resolving storage provider");

    match driver {
        #[cfg(feature = "mongodb")]
        StorageDriver::MongoDB => Ok(StorageProvider::MongoDB(
            super::drivers::mongo::MongoProvider::connect(credentials, connection_type).await?,
        )),

        #[cfg(feature = "mysql")]
        StorageDriver::MySQL => Ok(StorageProvider::MySQL(
            super::drivers::mysql::MySqlProvider::connect(credentials, connection_type).await?,
        )),

        #[cfg(feature = "sqlite-driver")]
        StorageDriver::SQLite => Ok(StorageProvider::SQLite(
            super::drivers::sqlite::SqliteProvider::connect(credentials, connection_type).await?,
        )),

        // Fallback for when feature not compiled
        #[allow(unreachable_patterns)]
        _ => Err(DataError::DriverNotAvailable(driver.feature_name())),
    }
}

/// Factory function - creates the right broker provider based on the
/// `driver` property.
pub async fn connect_messenger(
    credentials: Credentials,
    connection_type: ConnectionType,
) -> Result<Box<dyn Messenger>> {
    let driver: MessengerDriver = driver_name(&credentials)?.parse()?;
    if !driver.is_available() {
        return Err(DataError::DriverNotAvailable(driver.feature_name()));
    }
    debug!(driver = driver.name(), %connection_type, "Resolving messenger");

    match driver {
        #[cfg(feature = "redis")]
        MessengerDriver::Redis => Ok(Box::new(
            super::drivers::redis_driver::RedisMessenger::connect(credentials, connection_type)
                .await?,
        )),

        #[allow(unreachable_patterns)]
        _ => Err(DataError::DriverNotAvailable(driver.feature_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::error::ErrorKind;

    #[tokio::test]
    async fn unknown_driver_is_a_connection_error() {
        let credentials = Credentials::builder()
            .hostname("localhost")
            .port(1521)
            .driver("oracle")
            .build();

        let err = connect_storage(credentials.clone(), ConnectionType::Local)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::UnknownDriver(ref name) if name == "oracle"));
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err = connect_messenger(credentials, ConnectionType::Cluster)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::UnknownDriver(_)));
    }

    #[tokio::test]
    async fn missing_driver_is_reported() {
        let credentials = Credentials::builder().hostname("localhost").build();
        let err = connect_storage(credentials, ConnectionType::Local)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::MissingProperty("driver")));
    }

    #[tokio::test]
    async fn storage_names_are_not_messengers() {
        let credentials = Credentials::builder().driver("mongodb").build();
        let err = connect_messenger(credentials, ConnectionType::Local)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::UnknownDriver(_)));
    }

    /// Broker stand-in that records what was published
    #[derive(Default)]
    struct RecordingMessenger {
        published: std::sync::Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Provider for RecordingMessenger {
        fn backend(&self) -> &'static str {
            "Recording"
        }

        fn connection_type(&self) -> ConnectionType {
            ConnectionType::Local
        }

        async fn ping(&self) -> Result<ConnectionInfo> {
            Ok(ConnectionInfo {
                server_version: None,
                latency_ms: 0,
            })
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
            self.published.lock().unwrap().push(Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
            Ok(1)
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription> {
            let messages = self.published.lock().unwrap().clone();
            Ok(Subscription::new(channel, futures::stream::iter(messages).boxed()))
        }
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Event {
        kind: String,
        id: u32,
    }

    #[tokio::test]
    async fn json_helpers_work_through_trait_objects() {
        let messenger: Box<dyn Messenger> = Box::new(RecordingMessenger::default());
        let event = Event {
            kind: "created".into(),
            id: 7,
        };

        assert_eq!(messenger.publish_json("events", &event).await.unwrap(), 1);
        messenger.publish("events", "not json").await.unwrap();

        let mut subscription = messenger.subscribe("events").await.unwrap();
        assert_eq!(subscription.channel(), "events");
        assert_eq!(subscription.next_json::<Event>().await.unwrap().unwrap(), event);
        assert!(matches!(
            subscription.next_json::<Event>().await,
            Some(Err(DataError::JsonDeserialize(_)))
        ));
        assert!(subscription.next().await.is_none());
    }

    #[cfg(feature = "sqlite-driver")]
    #[tokio::test]
    async fn dispatch_builds_sqlite_provider() {
        let credentials = Credentials::builder()
            .database(":memory:")
            .driver("sqlite")
            .build();

        let provider = connect_storage(credentials, ConnectionType::Local)
            .await
            .unwrap();
        assert_eq!(provider.driver(), StorageDriver::SQLite);
        assert_eq!(provider.backend(), "SQLite");
        assert!(!provider.is_closed());

        provider.shutdown().await.unwrap();
        assert!(provider.is_closed());
    }
}

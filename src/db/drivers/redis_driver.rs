//! Redis driver implementation (publish/subscribe messenger)

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::db::connection::{ConnectionType, Credentials, URI};
use crate::db::driver::{ConnectionInfo, Message, Messenger, Provider, Subscription};
use crate::db::error::{DataError, Result};

const BACKEND: &str = "Redis";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a `redis://` (or `rediss://` with ssl) URL from credentials.
/// `properties["uri"]` is used verbatim when present. The database field is
/// the numeric logical database index and defaults to 0.
pub fn connection_url(credentials: &Credentials) -> Result<String> {
    if let Some(uri) = credentials.property(URI) {
        return Ok(uri.to_string());
    }

    let scheme = if credentials.ssl() { "rediss" } else { "redis" };
    let mut url = url::Url::parse(&format!(
        "{}://{}:{}",
        scheme,
        credentials.hostname(),
        credentials.port()
    ))
    .map_err(|e| DataError::InvalidConnectionString(e.to_string()))?;

    if !credentials.username().is_empty() {
        url.set_username(credentials.username())
            .map_err(|_| DataError::InvalidConnectionString("cannot set username".into()))?;
    }
    if !credentials.password().is_empty() {
        url.set_password(Some(credentials.password()))
            .map_err(|_| DataError::InvalidConnectionString("cannot set password".into()))?;
    }

    let index = match credentials.database().trim() {
        "" => 0,
        raw => raw.parse::<u32>().map_err(|_| DataError::InvalidProperty {
            key: "database",
            value: raw.to_string(),
        })?,
    };
    url.set_path(&format!("/{}", index));

    Ok(url.to_string())
}

/// Await `connecting` for at most `limit`. Expiry is a connection failure,
/// not pool exhaustion, since there is no pool behind it.
async fn connect_within<T, F>(limit: Duration, connecting: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    tokio::time::timeout(limit, connecting)
        .await
        .map_err(|_| DataError::connection(BACKEND, DataError::Timeout(limit)))?
        .map_err(|e| DataError::connection(BACKEND, e))
}

/// End `messages` once `closed` flips to true
fn until_closed(
    messages: BoxStream<'static, Message>,
    mut closed: watch::Receiver<bool>,
) -> BoxStream<'static, Message> {
    let stop = async move {
        let _ = closed.wait_for(|closed| *closed).await;
    };
    messages.take_until(stop).boxed()
}

/// Redis publish/subscribe messenger.
///
/// Subscriptions run on their own pub/sub connections; `shutdown` ends
/// their streams, which drops those connections.
pub struct RedisMessenger {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    closed: watch::Sender<bool>,
    connection_type: ConnectionType,
}

impl RedisMessenger {
    pub async fn connect(credentials: Credentials, connection_type: ConnectionType) -> Result<Self> {
        let url = connection_url(&credentials).map_err(|e| DataError::connection(BACKEND, e))?;
        debug!(
            host = credentials.hostname(),
            port = credentials.port(),
            tls = credentials.ssl(),
            "Opening Redis client"
        );

        let client =
            redis::Client::open(url.as_str()).map_err(|e| DataError::connection(BACKEND, e))?;

        let conn = connect_within(CONNECT_TIMEOUT, client.get_multiplexed_async_connection()).await?;

        info!(%connection_type, "Redis messenger ready");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            closed: watch::channel(false).0,
            connection_type,
        })
    }

    /// A handle on the shared multiplexed connection
    pub fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn
            .lock()
            .map_err(|_| DataError::Closed(BACKEND))?
            .clone()
            .ok_or(DataError::Closed(BACKEND))
    }
}

#[async_trait]
impl Provider for RedisMessenger {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    async fn ping(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();
        let mut conn = self.connection()?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;

        let info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;

        // Parse version from INFO output
        let version = info
            .lines()
            .find(|line| line.starts_with("redis_version:"))
            .map(|line| format!("Redis {}", line.trim_start_matches("redis_version:").trim()));

        Ok(ConnectionInfo {
            server_version: version,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        let taken = self
            .conn
            .lock()
            .map_err(|_| DataError::shutdown(BACKEND, "connection lock poisoned"))?
            .take();

        match taken {
            Some(conn) => {
                drop(conn);
                self.closed.send_replace(true);
                info!("Redis messenger shut down");
                Ok(())
            }
            None => Err(DataError::shutdown(BACKEND, "provider already shut down")),
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

#[async_trait]
impl Messenger for RedisMessenger {
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.connection()?;
        conn.publish(channel, payload)
            .await
            .map_err(|e| DataError::query(BACKEND, e))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(DataError::Closed(BACKEND));
        }

        let mut pubsub = connect_within(CONNECT_TIMEOUT, self.client.get_async_pubsub()).await?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        debug!(channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| {
                let message = msg.get_payload::<String>().ok().map(|payload| Message {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                });
                futures::future::ready(message)
            })
            .boxed();

        Ok(Subscription::new(
            channel,
            until_closed(stream, self.closed.subscribe()),
        ))
    }
}

//! MySQL driver implementation

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::connection::{ConnectionType, Credentials};
use crate::db::driver::{ConnectionInfo, Provider, SqlProvider};
use crate::db::error::{DataError, Result};

const BACKEND: &str = "MySQL";

/// Data source URL, filled in by placeholder substitution
pub const URL_TEMPLATE: &str = "jdbc:<driver>://<hostname>:<port>/<database>?useSSL=<ssl>";

const DEFAULT_PORT: u16 = 3306;

/// Pool limits and driver tuning applied to every MySQL pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    pub min_idle: usize,
    pub max_size: usize,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub statement_cache_size: usize,
    pub keepalive_ms: u32,
}

pub const POOL_POLICY: PoolPolicy = PoolPolicy {
    min_idle: 1,
    max_size: 20,
    connection_timeout: Duration::from_secs(30),
    idle_timeout: Duration::from_secs(10 * 60),
    max_lifetime: Duration::from_secs(30 * 60),
    statement_cache_size: 250,
    keepalive_ms: 30_000,
};

/// Substitute `<driver>`, `<hostname>`, `<port>`, `<database>` and `<ssl>` in
/// one pass over the template. Substituted values are not rescanned, so a
/// value that itself contains a placeholder is copied literally. Unknown
/// placeholders are left as they are. Nothing is escaped.
pub fn render_url(template: &str, credentials: &Credentials) -> String {
    let driver = credentials
        .driver()
        .map(|d| d.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "mysql".to_string());

    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let Some(end) = tail.find('>') else {
            out.push_str(tail);
            rest = "";
            break;
        };

        match &tail[1..end] {
            "driver" => out.push_str(&driver),
            "hostname" => out.push_str(credentials.hostname()),
            "port" => out.push_str(&credentials.port().to_string()),
            "database" => out.push_str(credentials.database()),
            "ssl" => out.push_str(if credentials.ssl() { "true" } else { "false" }),
            _ => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}

fn pool_opts(policy: &PoolPolicy) -> Result<PoolOpts> {
    let constraints = PoolConstraints::new(policy.min_idle, policy.max_size).ok_or_else(|| {
        DataError::InvalidProperty {
            key: "pool",
            value: format!("min {} > max {}", policy.min_idle, policy.max_size),
        }
    })?;

    Ok(PoolOpts::default()
        .with_constraints(constraints)
        .with_inactive_connection_ttl(policy.idle_timeout)
        .with_abs_conn_ttl(Some(policy.max_lifetime)))
}

/// Parse a rendered data source URL back into pool options. Host, port,
/// database and TLS come from the URL; user and password from credentials.
pub fn opts_from_url(url: &str, credentials: &Credentials) -> Result<Opts> {
    let stripped = url.strip_prefix("jdbc:").unwrap_or(url);
    let parsed = url::Url::parse(stripped)
        .map_err(|e| DataError::InvalidConnectionString(format!("{}: {}", url, e)))?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DataError::InvalidConnectionString(format!("{}: missing host", url)))?
        .to_string();
    let port = parsed.port().unwrap_or(DEFAULT_PORT);
    let database = parsed.path().trim_start_matches('/').to_string();
    let ssl = parsed
        .query_pairs()
        .any(|(key, value)| key == "useSSL" && value.eq_ignore_ascii_case("true"));

    let username = credentials.username();
    let password = credentials.password();

    let builder = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .db_name((!database.is_empty()).then_some(database))
        .user((!username.is_empty()).then(|| username.to_string()))
        .pass((!password.is_empty()).then(|| password.to_string()))
        .stmt_cache_size(POOL_POLICY.statement_cache_size)
        .tcp_nodelay(true)
        .tcp_keepalive(Some(POOL_POLICY.keepalive_ms))
        .init(vec!["SET time_zone = '+00:00'"])
        .pool_opts(pool_opts(&POOL_POLICY)?)
        .ssl_opts(ssl.then(SslOpts::default));

    Ok(Opts::from(builder))
}

pub struct MySqlProvider {
    pool: Pool,
    url: String,
    connection_type: ConnectionType,
    closed: AtomicBool,
    lifecycle: Mutex<()>,
}

impl MySqlProvider {
    /// Build the pool and check out one connection so a bad host or bad
    /// credentials fail here rather than on first use.
    pub async fn connect(credentials: Credentials, connection_type: ConnectionType) -> Result<Self> {
        let url = render_url(URL_TEMPLATE, &credentials);
        debug!(url = %url, "Building MySQL pool");

        let opts = opts_from_url(&url, &credentials).map_err(|e| DataError::connection(BACKEND, e))?;
        let pool = Pool::new(opts);

        let conn = match acquire(&pool).await {
            Ok(conn) => conn,
            Err(e) => {
                pool.disconnect().await.ok();
                return Err(DataError::connection(BACKEND, e));
            }
        };
        drop(conn);

        info!(url = %url, %connection_type, "MySQL provider ready");
        Ok(Self {
            pool,
            url,
            connection_type,
            closed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        })
    }

    /// The rendered data source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pool(&self) -> Result<&Pool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::Closed(BACKEND));
        }
        Ok(&self.pool)
    }

    /// Check out a pooled connection
    pub async fn connection(&self) -> Result<Conn> {
        acquire(self.pool()?).await
    }
}

async fn acquire(pool: &Pool) -> Result<Conn> {
    tokio::time::timeout(POOL_POLICY.connection_timeout, pool.get_conn())
        .await
        .map_err(|_| DataError::Timeout(POOL_POLICY.connection_timeout))?
        .map_err(|e| DataError::connection(BACKEND, e))
}

#[async_trait]
impl Provider for MySqlProvider {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    async fn ping(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let version: Option<String> = conn
            .query_first("SELECT VERSION()")
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?;

        Ok(ConnectionInfo {
            server_version: version.map(|v| format!("MySQL {}", v)),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DataError::shutdown(BACKEND, "provider already shut down"));
        }

        if let Err(e) = self.pool.clone().disconnect().await {
            warn!(error = %e, "MySQL pool did not disconnect cleanly");
            return Err(DataError::shutdown(BACKEND, e));
        }
        info!("MySQL provider shut down");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlProvider for MySqlProvider {
    async fn table_names(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        conn.query("SHOW TABLES")
            .await
            .map_err(|e| DataError::query(BACKEND, e))
    }

    async fn execute(&self, statement: &str, params: Vec<String>) -> Result<u64> {
        let mut conn = self.connection().await?;
        conn.exec_drop(statement, params)
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        Ok(conn.affected_rows())
    }

    async fn query_strings(&self, statement: &str, params: Vec<String>) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        conn.exec(statement, params)
            .await
            .map_err(|e| DataError::query(BACKEND, e))
    }

    async fn query_count(&self, statement: &str, params: Vec<String>) -> Result<u64> {
        let mut conn = self.connection().await?;
        let count: Option<u64> = conn
            .exec_first(statement, params)
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        Ok(count.unwrap_or(0))
    }
}

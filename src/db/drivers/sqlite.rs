//! SQLite driver implementation

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

use crate::db::connection::{ConnectionType, Credentials};
use crate::db::driver::{ConnectionInfo, Provider, SqlProvider};
use crate::db::error::{DataError, Result};

const BACKEND: &str = "SQLite";

/// A single SQLite connection. `credentials.database` is a file path or
/// `:memory:`; every other credential field is ignored.
pub struct SqliteProvider {
    conn: Arc<Mutex<Option<Connection>>>,
    path: String,
    connection_type: ConnectionType,
}

impl SqliteProvider {
    pub async fn connect(credentials: Credentials, connection_type: ConnectionType) -> Result<Self> {
        let path = credentials.database().to_string();
        if path.is_empty() {
            return Err(DataError::connection(
                BACKEND,
                DataError::InvalidConnectionString("database path is empty".into()),
            ));
        }
        if path != ":memory:" {
            // Check if parent directory exists for file paths
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(DataError::connection(
                        BACKEND,
                        DataError::InvalidConnectionString(format!(
                            "Parent directory does not exist: {}",
                            parent.display()
                        )),
                    ));
                }
            }
        }

        // SQLite is synchronous, so we open it in a blocking task
        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || Connection::open(&open_path))
            .await
            .map_err(|e| DataError::connection(BACKEND, e))?
            .map_err(|e| DataError::connection(BACKEND, e))?;

        info!(path = %path, %connection_type, "SQLite provider ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
            connection_type,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DataError::Dao("SQLite connection lock poisoned".into()))?;
            let conn = guard.as_ref().ok_or(DataError::Closed(BACKEND))?;
            f(conn).map_err(|e| DataError::query(BACKEND, e))
        })
        .await
        .map_err(|e| DataError::query(BACKEND, e))?
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    async fn ping(&self) -> Result<ConnectionInfo> {
        let start = Instant::now();
        let version: String = self
            .with_connection(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get(0)))
            .await?;

        Ok(ConnectionInfo {
            server_version: Some(format!("SQLite {}", version)),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        let taken = self
            .conn
            .lock()
            .map_err(|_| DataError::shutdown(BACKEND, "connection lock poisoned"))?
            .take();

        let conn = taken.ok_or_else(|| DataError::shutdown(BACKEND, "provider already shut down"))?;
        conn.close()
            .map_err(|(_, e)| DataError::shutdown(BACKEND, e))?;
        info!(path = %self.path, "SQLite provider shut down");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

#[async_trait]
impl SqlProvider for SqliteProvider {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    async fn execute(&self, statement: &str, params: Vec<String>) -> Result<u64> {
        let statement = statement.to_string();
        self.with_connection(move |conn| conn.execute(&statement, params_from_iter(params.iter())))
            .await
            .map(|rows| rows as u64)
    }

    async fn query_strings(&self, statement: &str, params: Vec<String>) -> Result<Vec<String>> {
        let statement = statement.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            let values = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(values)
        })
        .await
    }

    async fn query_count(&self, statement: &str, params: Vec<String>) -> Result<u64> {
        let statement = statement.to_string();
        let count: i64 = self
            .with_connection(move |conn| {
                conn.query_row(&statement, params_from_iter(params.iter()), |row| row.get(0))
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

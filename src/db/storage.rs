use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqliteConnection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::connection::{ConnectionType, Credentials};

/// A named, saved set of credentials
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub connection_type: ConnectionType,
    pub credentials: Credentials,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(name: impl Into<String>, credentials: Credentials, connection_type: ConnectionType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            connection_type,
            credentials,
            updated_at: Utc::now(),
        }
    }
}

/// SQLite-based storage for connection profiles
pub struct ProfileStore {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl ProfileStore {
    /// Open the store in the local data directory
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Open (and create if needed) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let conn = SqliteConnection::open(path)
            .with_context(|| format!("opening profile store {}", path.display()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                connection_type TEXT NOT NULL,
                hostname TEXT NOT NULL,
                port INTEGER NOT NULL,
                database TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                ssl INTEGER NOT NULL,
                properties TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join("vaults").join("profiles.db"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("profile store lock poisoned"))
    }

    /// Save a profile (insert, or replace the profile with the same name)
    pub fn save(&self, profile: &Profile) -> Result<()> {
        let properties = serde_json::to_string(profile.credentials.properties())?;
        let credentials = &profile.credentials;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO profiles
                (id, name, connection_type, hostname, port, database, username, password, ssl, properties, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                profile.id,
                profile.name,
                profile.connection_type.to_string(),
                credentials.hostname(),
                credentials.port(),
                credentials.database(),
                credentials.username(),
                credentials.password(),
                credentials.ssl(),
                properties,
                profile.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Profile>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{} WHERE name = ?1", SELECT_PROFILE),
                params![name],
                RawProfile::from_row,
            )
            .optional()?;

        raw.map(RawProfile::into_profile).transpose()
    }

    /// Get all saved profiles, ordered by name
    pub fn list(&self) -> Result<Vec<Profile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY name", SELECT_PROFILE))?;

        let raws = stmt
            .query_map([], RawProfile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raws.into_iter().map(RawProfile::into_profile).collect()
    }

    /// Delete a profile by name; returns whether one existed
    pub fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM profiles WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }
}

const SELECT_PROFILE: &str = "SELECT id, name, connection_type, hostname, port, database, username, password, ssl, properties, updated_at FROM profiles";

struct RawProfile {
    id: String,
    name: String,
    connection_type: String,
    hostname: String,
    port: u16,
    database: String,
    username: String,
    password: String,
    ssl: bool,
    properties: String,
    updated_at: String,
}

impl RawProfile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            connection_type: row.get(2)?,
            hostname: row.get(3)?,
            port: row.get(4)?,
            database: row.get(5)?,
            username: row.get(6)?,
            password: row.get(7)?,
            ssl: row.get(8)?,
            properties: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_profile(self) -> Result<Profile> {
        let properties: BTreeMap<String, String> = serde_json::from_str(&self.properties)
            .with_context(|| format!("properties of profile {}", self.name))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .with_context(|| format!("timestamp of profile {}", self.name))?
            .with_timezone(&Utc);

        Ok(Profile {
            id: self.id,
            connection_type: self.connection_type.parse()?,
            credentials: Credentials::new(
                self.hostname,
                self.port,
                self.database,
                self.username,
                self.password,
                self.ssl,
                properties,
            ),
            name: self.name,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("nested").join("profiles.db")).unwrap();
        (dir, store)
    }

    fn mongo_profile(name: &str) -> Profile {
        let credentials = Credentials::builder()
            .hostname("localhost")
            .port(27017)
            .database("testdb")
            .username("app")
            .password("secret")
            .driver("mongodb")
            .property("authentication", "admin")
            .build();
        Profile::new(name, credentials, ConnectionType::Cluster)
    }

    #[test]
    fn saved_profile_reads_back() {
        let (_dir, store) = store();
        let profile = mongo_profile("primary");
        store.save(&profile).unwrap();

        let loaded = store.get("primary").unwrap().unwrap();
        assert_eq!(loaded.id, profile.id);
        assert_eq!(loaded.credentials, profile.credentials);
        assert_eq!(loaded.connection_type, ConnectionType::Cluster);
        assert_eq!(loaded.updated_at.timestamp(), profile.updated_at.timestamp());
    }

    #[test]
    fn saving_same_name_replaces() {
        let (_dir, store) = store();
        store.save(&mongo_profile("primary")).unwrap();
        store.save(&mongo_profile("primary")).unwrap();
        store.save(&mongo_profile("replica")).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["primary", "replica"]);
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let (_dir, store) = store();
        store.save(&mongo_profile("primary")).unwrap();

        assert!(store.delete("primary").unwrap());
        assert!(!store.delete("primary").unwrap());
        assert!(store.get("primary").unwrap().is_none());
    }
}

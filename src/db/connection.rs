use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::{DataError, Result};

/// Property naming the backend to dispatch to.
pub const DRIVER: &str = "driver";
/// Property carrying a full connection URI that overrides the discrete fields.
pub const URI: &str = "uri";
/// Property naming the authentication source database (document store).
pub const AUTHENTICATION: &str = "authentication";

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageDriver {
    MongoDB,
    MySQL,
    SQLite,
}

impl StorageDriver {
    pub fn name(&self) -> &'static str {
        match self {
            StorageDriver::MongoDB => "MongoDB",
            StorageDriver::MySQL => "MySQL",
            StorageDriver::SQLite => "SQLite",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            StorageDriver::MongoDB => 27017,
            StorageDriver::MySQL => 3306,
            StorageDriver::SQLite => 0,
        }
    }

    /// Cargo feature that compiles this driver in
    pub fn feature_name(&self) -> &'static str {
        match self {
            StorageDriver::MongoDB => "mongodb",
            StorageDriver::MySQL => "mysql",
            StorageDriver::SQLite => "sqlite-driver",
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            StorageDriver::MongoDB => cfg!(feature = "mongodb"),
            StorageDriver::MySQL => cfg!(feature = "mysql"),
            StorageDriver::SQLite => cfg!(feature = "sqlite-driver"),
        }
    }
}

impl FromStr for StorageDriver {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StorageDriver::MongoDB),
            "mysql" | "mariadb" => Ok(StorageDriver::MySQL),
            "sqlite" | "sqlite3" => Ok(StorageDriver::SQLite),
            _ => Err(DataError::UnknownDriver(s.to_string())),
        }
    }
}

/// Supported message brokers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessengerDriver {
    Redis,
}

impl MessengerDriver {
    pub fn name(&self) -> &'static str {
        match self {
            MessengerDriver::Redis => "Redis",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            MessengerDriver::Redis => 6379,
        }
    }

    pub fn feature_name(&self) -> &'static str {
        match self {
            MessengerDriver::Redis => "redis",
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            MessengerDriver::Redis => cfg!(feature = "redis"),
        }
    }
}

impl FromStr for MessengerDriver {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(MessengerDriver::Redis),
            _ => Err(DataError::UnknownDriver(s.to_string())),
        }
    }
}

/// Where the backend lives. Carried through to providers as a label only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Installed on this machine, or on a host that allows remote access
    #[default]
    Local,
    /// A dedicated cluster serving only this backend
    Cluster,
}

impl FromStr for ConnectionType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConnectionType::Local),
            "cluster" => Ok(ConnectionType::Cluster),
            _ => Err(DataError::InvalidProperty {
                key: "connection_type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Local => f.write_str("local"),
            ConnectionType::Cluster => f.write_str("cluster"),
        }
    }
}

/// Connection parameters for one backend instance.
///
/// Nothing is validated here; an empty hostname or a zero port surfaces as a
/// connection failure when a provider is built from these credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    hostname: String,
    port: u16,
    database: String,
    username: String,
    password: String,
    ssl: bool,
    properties: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        ssl: bool,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ssl,
            properties,
        }
    }

    pub fn builder() -> CredentialsBuilder {
        CredentialsBuilder::default()
    }

    /// Build credentials from a flat property bag.
    ///
    /// `hostname`, `port`, `database`, `username`, `password` and `ssl` are
    /// lifted into fields; every other key is kept in the property bag.
    pub fn from_properties(mut properties: BTreeMap<String, String>) -> Result<Self> {
        let port = match properties.remove("port") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| DataError::InvalidProperty {
                key: "port",
                value: raw,
            })?,
            None => 0,
        };
        let ssl = match properties.remove("ssl") {
            Some(raw) => parse_bool(&raw).ok_or(DataError::InvalidProperty {
                key: "ssl",
                value: raw,
            })?,
            None => false,
        };

        Ok(Self {
            hostname: properties.remove("hostname").unwrap_or_default(),
            port,
            database: properties.remove("database").unwrap_or_default(),
            username: properties.remove("username").unwrap_or_default(),
            password: properties.remove("password").unwrap_or_default(),
            ssl,
            properties,
        })
    }

    /// Read credentials from `PREFIX_HOSTNAME`, `PREFIX_PORT`, `PREFIX_DATABASE`,
    /// `PREFIX_USERNAME`, `PREFIX_PASSWORD`, `PREFIX_SSL`, `PREFIX_DRIVER`,
    /// `PREFIX_URI` and `PREFIX_AUTHENTICATION`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        const KEYS: &[&str] = &[
            "hostname",
            "port",
            "database",
            "username",
            "password",
            "ssl",
            DRIVER,
            URI,
            AUTHENTICATION,
        ];

        let properties = KEYS
            .iter()
            .filter_map(|key| {
                let var = format!("{}_{}", prefix, key.to_ascii_uppercase());
                std::env::var(var).ok().map(|value| (key.to_string(), value))
            })
            .collect();

        Self::from_properties(properties)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn driver(&self) -> Option<&str> {
        self.property(DRIVER)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties: BTreeMap<&str, &str> = self
            .properties
            .iter()
            .map(|(k, v)| {
                if k == URI {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();

        f.debug_struct("Credentials")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("properties", &properties)
            .finish()
    }
}

/// Builder for [`Credentials`]
#[derive(Debug, Default, Clone)]
pub struct CredentialsBuilder {
    hostname: String,
    port: u16,
    database: String,
    username: String,
    password: String,
    ssl: bool,
    properties: BTreeMap<String, String>,
}

impl CredentialsBuilder {
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn driver(self, driver: impl Into<String>) -> Self {
        self.property(DRIVER, driver)
    }

    pub fn build(self) -> Credentials {
        Credentials {
            hostname: self.hostname,
            port: self.port,
            database: self.database,
            username: self.username,
            password: self.password,
            ssl: self.ssl,
            properties: self.properties,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

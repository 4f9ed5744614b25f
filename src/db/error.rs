use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by errors that wrap a driver failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad failure category, for callers that branch on what went wrong
/// rather than on which backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Shutdown,
    PoolExhausted,
    NotFound,
    Serialization,
    Dao,
    Configuration,
}

/// Errors that can occur during provider, DAO and adapter operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Connection to {backend} failed")]
    FailedConnection {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Shutdown of {backend} failed")]
    FailedShutdown {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{0} provider is already closed")]
    Closed(&'static str),
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Missing required property: {0}")]
    MissingProperty(&'static str),
    #[error("Invalid value for {key}: {value}")]
    InvalidProperty { key: &'static str, value: String },
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),
    #[error("Driver not available: {0} (not compiled)")]
    DriverNotAvailable(&'static str),
    #[error("Query against {backend} failed")]
    Query {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("DAO error: {0}")]
    Dao(String),
    #[error("No table bound; call create_table first")]
    TableNotBound,
    #[error("Value not found for key {0}")]
    ValueNotFound(String),
    #[error("Failed to serialize value")]
    JsonSerialize(#[source] serde_json::Error),
    #[error("Failed to deserialize value")]
    JsonDeserialize(#[source] serde_json::Error),
}

impl DataError {
    pub fn connection(backend: &'static str, source: impl Into<BoxError>) -> Self {
        DataError::FailedConnection {
            backend,
            source: source.into(),
        }
    }

    pub fn shutdown(backend: &'static str, source: impl Into<BoxError>) -> Self {
        DataError::FailedShutdown {
            backend,
            source: source.into(),
        }
    }

    pub fn query(backend: &'static str, source: impl Into<BoxError>) -> Self {
        DataError::Query {
            backend,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::FailedConnection { .. }
            | DataError::InvalidConnectionString(_)
            | DataError::UnknownDriver(_)
            | DataError::DriverNotAvailable(_)
            | DataError::Closed(_)
            | DataError::Query { .. } => ErrorKind::Connection,
            DataError::FailedShutdown { .. } => ErrorKind::Shutdown,
            DataError::Timeout(_) => ErrorKind::PoolExhausted,
            DataError::MissingProperty(_) | DataError::InvalidProperty { .. } => {
                ErrorKind::Configuration
            }
            DataError::Dao(_) | DataError::TableNotBound => ErrorKind::Dao,
            DataError::ValueNotFound(_) => ErrorKind::NotFound,
            DataError::JsonSerialize(_) | DataError::JsonDeserialize(_) => {
                ErrorKind::Serialization
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

//! Typed accessors bound to one provider and one collection or table

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::driver::Provider;
use super::error::Result;

#[cfg(feature = "mongodb")]
pub mod mongo;

#[cfg(any(feature = "mysql", feature = "sqlite-driver"))]
pub mod sql;

/// Anything a DAO can store
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

/// Key/value access to one collection or table.
///
/// `create_table` must run before anything else; until then every other
/// operation fails with [`DataError::TableNotBound`](super::error::DataError::TableNotBound).
#[async_trait]
pub trait StorageDao<T: Record>: Send + Sync {
    fn provider(&self) -> &dyn Provider;

    /// Name of the bound collection or table, if any
    fn table(&self) -> Option<&str>;

    /// Create the backing collection or table if no existing one matches
    /// `name` case-insensitively, then bind to it.
    async fn create_table(&mut self, name: &str) -> Result<()>;

    /// Insert, or replace the record already stored under `key`
    async fn save(&self, key: &str, value: &T) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn contains(&self, key: &str) -> Result<bool>;

    /// The record stored under `key`, or `ValueNotFound`
    async fn find(&self, key: &str) -> Result<T>;

    /// Every record, loaded eagerly
    async fn find_all(&self) -> Result<Vec<T>>;
}

/// Find an existing name equal to `name` ignoring case (Unicode folding).
/// Returns the stored spelling so callers bind to what actually exists.
pub fn find_ignore_case<'a>(existing: &'a [String], name: &str) -> Option<&'a str> {
    let wanted = name.to_lowercase();
    existing
        .iter()
        .find(|candidate| candidate.to_lowercase() == wanted)
        .map(String::as_str)
}

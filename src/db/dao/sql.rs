use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

use super::{find_ignore_case, Record, StorageDao};
use crate::db::driver::{Provider, SqlProvider};
use crate::db::error::{DataError, Result};
use crate::json::JsonAdapter;

/// DAO over one relational table of `(id, payload)` rows, the payload being
/// the JSON encoding of the record. Works on any [`SqlProvider`].
pub struct SqlDao<T, P> {
    provider: Arc<P>,
    table: Option<String>,
    json: JsonAdapter,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record, P: SqlProvider> SqlDao<T, P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            table: None,
            json: JsonAdapter,
            _record: PhantomData,
        }
    }

    fn table_name(&self) -> Result<&str> {
        self.table.as_deref().ok_or(DataError::TableNotBound)
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DataError::Dao(format!("invalid table name: {:?}", name)))
    }
}

#[async_trait]
impl<T: Record, P: SqlProvider + 'static> StorageDao<T> for SqlDao<T, P> {
    fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    async fn create_table(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;

        let existing = self.provider.table_names().await?;
        let bound = match find_ignore_case(&existing, name) {
            Some(found) => found.to_string(),
            None => {
                let statement = format!(
                    "CREATE TABLE IF NOT EXISTS {} (id VARCHAR(255) NOT NULL PRIMARY KEY, payload TEXT NOT NULL)",
                    name
                );
                self.provider.execute(&statement, Vec::new()).await?;
                info!(table = name, backend = self.provider.backend(), "Created table");
                name.to_string()
            }
        };

        self.table = Some(bound);
        Ok(())
    }

    async fn save(&self, key: &str, value: &T) -> Result<()> {
        let table = self.table_name()?;
        let payload = self.json.serialize(value)?;
        let statement = format!("REPLACE INTO {} (id, payload) VALUES (?, ?)", table);
        self.provider
            .execute(&statement, vec![key.to_string(), payload])
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let statement = format!("DELETE FROM {} WHERE id = ?", self.table_name()?);
        self.provider
            .execute(&statement, vec![key.to_string()])
            .await?;
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let statement = format!("SELECT COUNT(*) FROM {} WHERE id = ?", self.table_name()?);
        let count = self
            .provider
            .query_count(&statement, vec![key.to_string()])
            .await?;
        Ok(count > 0)
    }

    async fn find(&self, key: &str) -> Result<T> {
        let statement = format!("SELECT payload FROM {} WHERE id = ? LIMIT 1", self.table_name()?);
        let payload = self
            .provider
            .query_strings(&statement, vec![key.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ValueNotFound(key.to_string()))?;

        self.json.deserialize(&payload)
    }

    async fn find_all(&self) -> Result<Vec<T>> {
        let statement = format!("SELECT payload FROM {} ORDER BY id", self.table_name()?);
        self.provider
            .query_strings(&statement, Vec::new())
            .await?
            .iter()
            .map(|payload| self.json.deserialize(payload))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["users", "_audit", "Orders2024", "a_b_c"] {
            assert!(validate_identifier(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn rejects_anything_that_could_break_the_statement() {
        for name in ["", "1users", "users; DROP TABLE x", "my-table", "sp ace", "naïve"] {
            assert!(
                matches!(validate_identifier(name), Err(DataError::Dao(_))),
                "{}",
                name
            );
        }
    }

    #[cfg(feature = "sqlite-driver")]
    #[tokio::test]
    async fn create_table_binds_to_existing_spelling() {
        use crate::db::connection::{ConnectionType, Credentials};
        use crate::db::drivers::sqlite::SqliteProvider;

        let credentials = Credentials::builder().database(":memory:").build();
        let provider = Arc::new(
            SqliteProvider::connect(credentials, ConnectionType::Local)
                .await
                .unwrap(),
        );
        provider
            .execute("CREATE TABLE Users (id VARCHAR(255) NOT NULL PRIMARY KEY, payload TEXT NOT NULL)", vec![])
            .await
            .unwrap();

        let mut dao: SqlDao<String, _> = SqlDao::new(provider);
        dao.create_table("users").await.unwrap();
        assert_eq!(dao.table(), Some("Users"));
        assert_eq!(dao.provider().backend(), "SQLite");
    }
}

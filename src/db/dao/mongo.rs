use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::Collection;
use std::sync::Arc;
use tracing::info;

use super::{find_ignore_case, Record, StorageDao};
use crate::db::driver::Provider;
use crate::db::drivers::mongo::MongoProvider;
use crate::db::error::{DataError, Result};

const BACKEND: &str = "MongoDB";

/// DAO over one MongoDB collection. Keys are stored as the document `_id`.
pub struct MongoDao<T: Record> {
    provider: Arc<MongoProvider>,
    collection: Option<Collection<T>>,
}

impl<T: Record> MongoDao<T> {
    pub fn new(provider: Arc<MongoProvider>) -> Self {
        Self {
            provider,
            collection: None,
        }
    }

    fn collection(&self) -> Result<&Collection<T>> {
        self.collection.as_ref().ok_or(DataError::TableNotBound)
    }
}

fn key_filter(key: &str) -> Document {
    doc! { "_id": key }
}

#[async_trait]
impl<T: Record> StorageDao<T> for MongoDao<T> {
    fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    fn table(&self) -> Option<&str> {
        self.collection.as_ref().map(|c| c.name())
    }

    async fn create_table(&mut self, name: &str) -> Result<()> {
        let database = self.provider.database()?;
        let existing = database
            .list_collection_names()
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;

        let bound = match find_ignore_case(&existing, name) {
            Some(found) => found.to_string(),
            None => {
                database
                    .create_collection(name)
                    .await
                    .map_err(|e| DataError::query(BACKEND, e))?;
                info!(collection = name, "Created MongoDB collection");
                name.to_string()
            }
        };

        self.collection = Some(database.collection::<T>(&bound));
        Ok(())
    }

    async fn save(&self, key: &str, value: &T) -> Result<()> {
        self.collection()?
            .replace_one(key_filter(key), value)
            .upsert(true)
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.collection()?
            .delete_one(key_filter(key))
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let count = self
            .collection()?
            .count_documents(key_filter(key))
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;
        Ok(count > 0)
    }

    async fn find(&self, key: &str) -> Result<T> {
        self.collection()?
            .find_one(key_filter(key))
            .await
            .map_err(|e| DataError::query(BACKEND, e))?
            .ok_or_else(|| DataError::ValueNotFound(key.to_string()))
    }

    async fn find_all(&self) -> Result<Vec<T>> {
        let cursor = self
            .collection()?
            .find(doc! {})
            .await
            .map_err(|e| DataError::query(BACKEND, e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| DataError::query(BACKEND, e))
    }
}

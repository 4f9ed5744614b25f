#![cfg(feature = "sqlite-driver")]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vaults::db::dao::sql::SqlDao;
use vaults::{
    connect_storage, ConnectionType, Credentials, DataError, ErrorKind, Provider, SqlProvider,
    StorageDao, StorageDriver,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    age: u32,
}

fn user(name: &str, age: u32) -> User {
    User {
        name: name.to_string(),
        age,
    }
}

async fn users_dao() -> Box<dyn StorageDao<User>> {
    let credentials = Credentials::builder()
        .database(":memory:")
        .driver("sqlite")
        .build();
    let provider = connect_storage(credentials, ConnectionType::Local)
        .await
        .expect("sqlite connects");
    assert_eq!(provider.driver(), StorageDriver::SQLite);

    let mut dao = provider.into_dao::<User>();
    dao.create_table("users").await.expect("table created");
    dao
}

#[tokio::test]
async fn save_then_find_returns_value() {
    let dao = users_dao().await;
    let ada = user("Ada", 36);

    dao.save("ada", &ada).await.unwrap();

    assert_eq!(dao.find("ada").await.unwrap(), ada);
    assert!(dao.contains("ada").await.unwrap());
}

#[tokio::test]
async fn find_of_unsaved_key_is_not_found() {
    let dao = users_dao().await;

    let err = dao.find("nobody").await.unwrap_err();
    assert!(matches!(err, DataError::ValueNotFound(ref key) if key == "nobody"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dao.contains("nobody").await.unwrap());
}

#[tokio::test]
async fn delete_removes_the_record() {
    let dao = users_dao().await;
    dao.save("ada", &user("Ada", 36)).await.unwrap();
    dao.save("alan", &user("Alan", 41)).await.unwrap();

    dao.delete("ada").await.unwrap();

    assert!(!dao.contains("ada").await.unwrap());
    assert!(dao.contains("alan").await.unwrap());
}

#[tokio::test]
async fn second_save_replaces_without_duplicating() {
    let dao = users_dao().await;
    dao.save("ada", &user("Ada", 36)).await.unwrap();
    dao.save("grace", &user("Grace", 85)).await.unwrap();
    let before = dao.find_all().await.unwrap().len();

    dao.save("ada", &user("Ada Lovelace", 37)).await.unwrap();

    assert_eq!(dao.find("ada").await.unwrap(), user("Ada Lovelace", 37));
    assert_eq!(dao.find_all().await.unwrap().len(), before);
}

#[tokio::test]
async fn find_all_is_ordered_by_key() {
    let dao = users_dao().await;
    dao.save("c", &user("Carol", 3)).await.unwrap();
    dao.save("a", &user("Alice", 1)).await.unwrap();
    dao.save("b", &user("Bob", 2)).await.unwrap();

    let names: Vec<_> = dao
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
}

#[tokio::test]
async fn create_table_is_case_insensitive_and_idempotent() {
    let mut dao = users_dao().await;
    dao.save("ada", &user("Ada", 36)).await.unwrap();

    dao.create_table("USERS").await.unwrap();

    assert_eq!(dao.table(), Some("users"));
    assert!(dao.contains("ada").await.unwrap());
}

#[tokio::test]
async fn create_table_on_empty_store_creates_exactly_one_table() {
    let credentials = Credentials::builder()
        .database(":memory:")
        .driver("sqlite")
        .build();
    let provider = connect_storage(credentials, ConnectionType::Local)
        .await
        .unwrap()
        .into_sqlite()
        .unwrap();
    let provider = Arc::new(provider);
    assert!(provider.table_names().await.unwrap().is_empty());

    let mut dao: SqlDao<User, _> = SqlDao::new(Arc::clone(&provider));
    dao.create_table("users").await.unwrap();
    assert_eq!(provider.table_names().await.unwrap(), vec!["users".to_string()]);

    dao.create_table("USERS").await.unwrap();
    assert_eq!(provider.table_names().await.unwrap(), vec!["users".to_string()]);
    assert_eq!(dao.table(), Some("users"));
}

#[tokio::test]
async fn unbound_dao_and_bad_names_fail() {
    let credentials = Credentials::builder()
        .database(":memory:")
        .driver("sqlite")
        .build();
    let provider = connect_storage(credentials, ConnectionType::Local)
        .await
        .unwrap();
    let mut dao = provider.into_dao::<User>();

    assert!(matches!(dao.find_all().await, Err(DataError::TableNotBound)));
    let err = dao.create_table("users; DROP TABLE x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dao);
}

#[tokio::test]
async fn provider_lifecycle_through_dao() {
    let dao = users_dao().await;
    let provider = dao.provider();
    assert!(!provider.is_closed());

    provider.shutdown().await.unwrap();

    assert!(provider.is_closed());
    let err = dao.contains("ada").await.unwrap_err();
    assert!(matches!(err, DataError::Closed("SQLite")));
}

#[tokio::test]
async fn unknown_driver_fails_before_connecting() {
    let credentials = Credentials::builder()
        .hostname("localhost")
        .port(5432)
        .driver("postgres")
        .build();

    let err = connect_storage(credentials, ConnectionType::Cluster)
        .await
        .err()
        .expect("postgres is not a known driver");
    assert!(matches!(err, DataError::UnknownDriver(_)));
    assert_eq!(err.kind(), ErrorKind::Connection);
}

//! Uniform access to document stores, relational databases and message
//! brokers.
//!
//! Build [`Credentials`], name the backend in the `driver` property and hand
//! them to [`connect_storage`] or [`connect_messenger`]. Storage providers are
//! then wrapped in a [`StorageDao`] bound to one collection or table.
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use vaults::{connect_storage, ConnectionType, Credentials};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! # async fn example() -> vaults::Result<()> {
//! let credentials = Credentials::builder()
//!     .hostname("localhost")
//!     .port(27017)
//!     .database("app")
//!     .driver("mongodb")
//!     .build();
//!
//! let provider = connect_storage(credentials, ConnectionType::Local).await?;
//! let mut users = provider.into_dao::<User>();
//! users.create_table("users").await?;
//! users.save("ada", &User { name: "Ada".into() }).await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod json;

pub use db::*;
pub use json::JsonAdapter;

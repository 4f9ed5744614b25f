pub mod connection;
pub mod dao;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod storage;

pub use connection::{ConnectionType, Credentials, CredentialsBuilder, MessengerDriver, StorageDriver};
pub use dao::{Record, StorageDao};
pub use driver::{
    connect_messenger, connect_storage, ConnectionInfo, Message, Messenger, MessengerExt,
    Provider, SqlProvider, StorageProvider, Subscription,
};
pub use error::{DataError, ErrorKind, Result};
pub use storage::{Profile, ProfileStore};

//! MongoDB backend of the session store.
//!
//! Change notifications come from change streams, which MongoDB only serves on replica sets.
//! Devices keep converging through polling when the deployment cannot provide them.

mod config;
mod connection;
mod error;
mod models;
/// [`SessionStore`](crate::dao::session_store::SessionStore) over MongoDB collections.
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateKey { .. } => StorageError::conflict(err.to_string()),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

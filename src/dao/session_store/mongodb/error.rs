use mongodb::error::{
    Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure,
};
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("duplicate key in collection `{collection}`: {detail}")]
    DuplicateKey {
        collection: &'static str,
        detail: String,
    },
    #[error("failed to {action} in collection `{collection}`")]
    Operation {
        action: &'static str,
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("document `{id}` in collection `{collection}` is malformed: {reason}")]
    Malformed {
        collection: &'static str,
        id: String,
        reason: String,
    },
}

impl MongoDaoError {
    /// Wrap a driver error, turning unique index violations into [`MongoDaoError::DuplicateKey`].
    pub fn operation(action: &'static str, collection: &'static str, source: MongoError) -> Self {
        if is_duplicate_key(&source) {
            return MongoDaoError::DuplicateKey {
                collection,
                detail: source.to_string(),
            };
        }
        MongoDaoError::Operation {
            action,
            collection,
            source,
        }
    }

    /// Whether a transaction failed on a write conflict and can be retried from the start.
    pub fn is_transient_transaction(&self) -> bool {
        matches!(
            self,
            MongoDaoError::Operation { source, .. } if source.contains_label(TRANSIENT_TRANSACTION_ERROR)
        )
    }
}

pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
        // findAndModify upserts report index violations as command errors.
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

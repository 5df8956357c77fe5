use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration {id} failed: {reason}")]
    MigrationFailed { id: String, reason: String },

    #[error("unknown migration: {0}")]
    UnknownMigration(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The migration id this error is attributed to, if any.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Error::MigrationFailed { id, .. } | Error::UnknownMigration(id) => Some(id),
            _ => None,
        }
    }
}

use thiserror::Error;

/// Convenience type alias for Results using this crate's Error type
pub type Result<T> = core::result::Result<T, Error>;

/// Main error type for the key store
///
/// Every failure the store surfaces to callers maps to exactly one of these
/// kinds, so callers can match on the kind without parsing messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("the key store is watching-only and holds no private key material")]
    WatchingOnly,
    #[error("{0}")]
    Locked(&'static str),
    #[error("invalid passphrase")]
    Passphrase,
    #[error("crypto failure: {0}")]
    Crypto(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("{0} already exists")]
    Exist(String),
    #[error("{0} does not exist")]
    NotExist(String),
    #[error("storage failure: {0}")]
    Io(String),
    #[error("the seed or extended public key is unusable: a required child is invalid")]
    Seed,
    #[error("extended key derivation failed: {0}")]
    Derivation(#[from] bitcoin::bip32::Error),
}

impl Error {
    pub fn invalid(e: impl core::fmt::Display) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Io(format!("{value}"))
    }
}

impl From<redb::Error> for Error {
    fn from(value: redb::Error) -> Self {
        Self::Io(format!("{value}"))
    }
}
impl From<redb::DatabaseError> for Error {
    fn from(value: redb::DatabaseError) -> Self {
        Self::Io(format!("{value}"))
    }
}
impl From<redb::TableError> for Error {
    fn from(value: redb::TableError) -> Self {
        Self::Io(format!("{value}"))
    }
}
impl From<redb::StorageError> for Error {
    fn from(value: redb::StorageError) -> Self {
        Self::Io(format!("{value}"))
    }
}
impl From<redb::TransactionError> for Error {
    fn from(value: redb::TransactionError) -> Self {
        Self::Io(format!("{value}"))
    }
}
impl From<redb::CommitError> for Error {
    fn from(value: redb::CommitError) -> Self {
        Self::Io(format!("{value}"))
    }
}

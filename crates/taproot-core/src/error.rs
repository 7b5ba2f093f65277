use crate::{
    convert::ConversionError, db::StoreError, key::KeyError, model::property::ValidateError,
    model::registry::RegistryError, query::QueryError,
};
use thiserror::Error as ThisError;

///
/// Error
///
/// Crate-level aggregate over the module error taxonomies. Everything in
/// here is locally recoverable by the caller; nothing is swallowed or
/// retried inside the engine.
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

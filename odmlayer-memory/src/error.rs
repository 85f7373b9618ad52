//! Errors raised by the in-memory backend.
//!
//! They reach callers wrapped in `OdmError::Backend`, the same way driver errors do.

use bson::Bson;
use thiserror::Error;

use odmlayer_core::error::OdmError;

#[derive(Error, Debug)]
pub enum MemoryError {
    /// A document with the same `_id` already exists in the collection.
    #[error("Duplicate key {id} in collection {collection}")]
    DuplicateKey { collection: String, id: Bson },
    /// A filter, update or pipeline stage is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The context is not bound to a transaction of this store.
    #[error("No transaction in progress")]
    NoTransaction,
}

pub(crate) fn invalid(message: impl Into<String>) -> OdmError {
    OdmError::backend(MemoryError::InvalidQuery(message.into()))
}

pub(crate) fn unsupported(kind: &str, name: &str) -> OdmError {
    OdmError::Unsupported(format!("{kind} {name} in the in-memory backend"))
}

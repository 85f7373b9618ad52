//! Error types and result types for model and collection operations.
//!
//! Use [`OdmResult<T>`] as the return type for fallible operations. Errors raised by a
//! backend (and therefore by the MongoDB driver) are carried verbatim in
//! [`OdmError::Backend`] so callers can downcast to the driver's own error type.

use std::{error::Error as StdError, time::Duration};

use bson::error::Error as BsonError;
use thiserror::Error;

/// Boxed error type used to carry backend errors without reinterpreting them.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all possible errors that can occur when working with models and collections.
#[derive(Error, Debug)]
pub enum OdmError {
    /// A raw value could not be converted into the model's identifier type.
    #[error("Invalid id: {0}")]
    InvalidId(String),
    /// A lifecycle hook returned an error.
    ///
    /// Raised by a before-hook this aborts the operation before anything is written.
    /// Raised by an after-hook the write has already been acknowledged.
    #[error("Hook error: {0}")]
    Hook(String),
    /// No document matched the lookup.
    /// The first argument is the filter, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// Serialization/deserialization error when converting between models and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The context deadline elapsed before the backend responded.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The context was cancelled while the operation was in flight.
    #[error("Operation cancelled")]
    Cancelled,
    /// An error returned by the storage backend, passed through unchanged.
    #[error(transparent)]
    Backend(BoxError),
    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// A specialized `Result` type for model and collection operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl OdmError {
    /// Creates a hook error from any message.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Wraps a backend error without altering it.
    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    /// Returns the backend error as `E` if this is a backend error of that type.
    pub fn backend_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Backend(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns `true` for [`OdmError::DocumentNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound(..))
    }
}

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

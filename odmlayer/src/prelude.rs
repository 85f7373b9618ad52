//! Commonly used types, traits and functions.
//!
//! ```ignore
//! use odmlayer::prelude::*;
//! ```

pub use bson::{Bson, Document, doc, oid::ObjectId};

pub use odmlayer_core::{
    backend::{
        AggregateOptions, CountOptions, DeleteResult, DocumentStream, FindOneOptions, FindOptions,
        InsertManyResult, StoreBackend, UpdateOptions, UpdateResult,
    },
    builder::{self, Operator, StageInput},
    collection::Collection,
    config::Config,
    context::{CancelGuard, Ctx},
    error::{OdmError, OdmResult},
    field,
    model::{DefaultModel, IdField, Model, ModelBase, ModelHooks},
    operator,
    store::{ModelStore, Transaction},
};
pub use odmlayer_macros::Model;

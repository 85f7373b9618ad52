//! Storage backend abstraction for collection operations.
//!
//! The collection facade never talks to a database directly. It forwards every call to a
//! [`StoreBackend`], which for production use is the MongoDB driver wrapper from
//! `odmlayer-mongodb`, and for tests the in-memory backend from `odmlayer-memory`.
//!
//! Backends receive the operation's [`Ctx`] so they can pick up a bound transaction
//! session. Deadlines and cancellation are enforced by the facade around the call.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::{backend::StoreBackend, bson::doc, context::Ctx};
//!
//! let ctx = Ctx::background();
//! let id = backend.insert_one(&ctx, "users", doc! { "name": "Alice" }).await?;
//! let found = backend.find_one(&ctx, "users", doc! { "_id": id }, Default::default()).await?;
//! ```

use std::{collections::HashMap, fmt::Debug};

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;

use crate::{
    context::Ctx,
    error::{OdmError, OdmResult},
};

/// A stream of raw documents produced by `find` and `aggregate`.
pub type DocumentStream = BoxStream<'static, OdmResult<Document>>;

/// Options for `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

/// Options for `find_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub projection: Option<Document>,
}

/// Options for `update_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Insert a new document when the filter matches nothing.
    pub upsert: Option<bool>,
}

/// Options for `count_documents`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

/// Options for `aggregate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
}

/// Outcome of an update, handed to after-update hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Outcome of a delete, handed to after-delete hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Outcome of a bulk insert: inserted identifiers keyed by input position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: HashMap<usize, Bson>,
}

/// Abstract interface over the database driver.
///
/// Implementations must be thread-safe; a single backend is shared by every collection
/// handle of a store. Errors from the underlying driver must be returned as
/// [`OdmError::Backend`] without reinterpretation.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts one document and returns its identifier, generating one when `_id` is missing.
    async fn insert_one(&self, ctx: &Ctx, collection: &str, document: Document) -> OdmResult<Bson>;

    /// Inserts several documents in order.
    async fn insert_many(
        &self,
        ctx: &Ctx,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<InsertManyResult>;

    /// Returns the first document matching `filter`.
    async fn find_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOneOptions,
    ) -> OdmResult<Option<Document>>;

    /// Returns a stream over every document matching `filter`.
    async fn find(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentStream>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> OdmResult<UpdateResult>;

    /// Deletes the first document matching `filter`.
    async fn delete_one(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult>;

    /// Deletes every document matching `filter`.
    async fn delete_many(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult>;

    /// Counts the documents matching `filter`.
    async fn count_documents(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: CountOptions,
    ) -> OdmResult<u64>;

    /// Runs an aggregation pipeline and returns a stream over its output.
    async fn aggregate(
        &self,
        ctx: &Ctx,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> OdmResult<DocumentStream>;

    /// Starts a session with an open transaction and returns a context bound to it.
    ///
    /// Backends without transaction support keep the default, which fails with
    /// [`OdmError::Unsupported`].
    async fn start_transaction(&self, _ctx: &Ctx) -> OdmResult<Ctx> {
        Err(OdmError::Unsupported("transactions".to_string()))
    }

    /// Commits the transaction bound to `ctx`.
    async fn commit_transaction(&self, _ctx: &Ctx) -> OdmResult<()> {
        Err(OdmError::Unsupported("transactions".to_string()))
    }

    /// Aborts the transaction bound to `ctx`.
    async fn abort_transaction(&self, _ctx: &Ctx) -> OdmResult<()> {
        Err(OdmError::Unsupported("transactions".to_string()))
    }

    /// Returns `true` while the transaction bound to `ctx` is neither committed nor aborted.
    async fn transaction_in_progress(&self, _ctx: &Ctx) -> bool {
        false
    }

    /// Ends the session bound to `ctx`, aborting a transaction still in progress.
    async fn end_session(&self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    /// Releases the resources held by the backend.
    async fn shutdown(self) -> OdmResult<()>
    where
        Self: Sized;
}

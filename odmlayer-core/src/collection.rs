//! The per-collection facade.
//!
//! A [`Collection`] names one collection of a backend. Every operation comes in two forms:
//! the `_with_ctx` variant runs under a caller-supplied [`Ctx`] (for example one bound to
//! a transaction), while the plain variant creates a context from the store's default
//! timeout and releases it when the call returns.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::prelude::*;
//!
//! let books = store.coll::<Book>();
//!
//! let mut book = Book::new("Dune", 412);
//! books.create(&mut book).await?;
//!
//! let mut found = Book::default();
//! books.find_by_id(book.id(), &mut found, None).await?;
//!
//! found.pages += 1;
//! books.update(&mut found).await?;
//! books.delete(&mut found).await?;
//! ```

use bson::{Bson, Document, de::deserialize_from_document, doc, ser::serialize_to_document};
use futures::TryStreamExt;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    backend::{
        AggregateOptions, CountOptions, DeleteResult, DocumentStream, FindOneOptions, FindOptions,
        InsertManyResult, StoreBackend, UpdateOptions,
    },
    builder::{StageInput, pipeline},
    config::Config,
    context::Ctx,
    error::{OdmError, OdmResult},
    field, hooks,
    model::Model,
};

/// A handle to one named collection of a backend.
///
/// Handles are cheap to create and hold no state besides the collection name and
/// references to the backend and config; any number of them may address the same
/// collection at once.
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    config: &'a Config,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B, config: &'a Config) -> Self {
        Self { name, backend, config }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finds a document by identifier and decodes it into `model`.
    ///
    /// `id` may be any value the model's `prepare_id` accepts, e.g. a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidId`] when `id` cannot be prepared and
    /// [`OdmError::DocumentNotFound`] when no document has that identifier.
    pub async fn find_by_id<M: Model>(
        &self,
        id: impl Into<Bson>,
        model: &mut M,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.find_by_id_with_ctx(&ctx, id, model, options).await
    }

    pub async fn find_by_id_with_ctx<M: Model>(
        &self,
        ctx: &Ctx,
        id: impl Into<Bson>,
        model: &mut M,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<()> {
        let id = model.prepare_id(id.into())?;

        self.first_with_ctx(ctx, doc! { field::ID: id }, model, options)
            .await
    }

    /// Decodes the first document matching `filter` into `model`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::DocumentNotFound`] when nothing matches.
    pub async fn first<M: Model>(
        &self,
        filter: Document,
        model: &mut M,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.first_with_ctx(&ctx, filter, model, options).await
    }

    pub async fn first_with_ctx<M: Model>(
        &self,
        ctx: &Ctx,
        filter: Document,
        model: &mut M,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<()> {
        debug!(collection = %self.name, filter = %filter, "Finding first document");

        let description = filter.to_string();
        let found = ctx
            .run(self.backend.find_one(
                ctx,
                &self.name,
                filter,
                options.into().unwrap_or_default(),
            ))
            .await?;

        match found {
            Some(document) => {
                *model = deserialize_from_document(document)?;
                Ok(())
            }
            None => Err(OdmError::DocumentNotFound(description, self.name.clone())),
        }
    }

    /// Inserts `model` and assigns the identifier generated by the backend.
    ///
    /// Runs the create and save hooks around the insert.
    pub async fn create<M: Model>(&self, model: &mut M) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.create_with_ctx(&ctx, model).await
    }

    pub async fn create_with_ctx<M: Model>(&self, ctx: &Ctx, model: &mut M) -> OdmResult<()> {
        hooks::before_create(ctx, model).await?;

        debug!(collection = %self.name, "Creating document");
        let document = serialize_to_document(model)?;
        let id = ctx
            .run(self.backend.insert_one(ctx, &self.name, document))
            .await?;

        model.set_id(id);

        hooks::after_create(ctx, model).await
    }

    /// Persists every field of `model` with `$set` on the document sharing its identifier.
    ///
    /// Runs the update and save hooks around the write.
    pub async fn update<M: Model>(&self, model: &mut M) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.update_with_ctx(&ctx, model).await
    }

    pub async fn update_with_ctx<M: Model>(&self, ctx: &Ctx, model: &mut M) -> OdmResult<()> {
        hooks::before_update(ctx, model).await?;

        let id = model.id();
        debug!(collection = %self.name, id = %id, "Updating document");

        let result = ctx
            .run(self.backend.update_one(
                ctx,
                &self.name,
                doc! { field::ID: id },
                doc! { "$set": serialize_to_document(model)? },
                UpdateOptions::default(),
            ))
            .await?;

        hooks::after_update(ctx, &result, model).await
    }

    /// Assigns the prepared `id` to `model`, then updates it like [`Collection::update`].
    pub async fn update_by_id<M: Model>(&self, id: impl Into<Bson>, model: &mut M) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.update_by_id_with_ctx(&ctx, id, model).await
    }

    pub async fn update_by_id_with_ctx<M: Model>(
        &self,
        ctx: &Ctx,
        id: impl Into<Bson>,
        model: &mut M,
    ) -> OdmResult<()> {
        let id = model.prepare_id(id.into())?;
        model.set_id(id);

        self.update_with_ctx(ctx, model).await
    }

    /// Deletes the document sharing `model`'s identifier.
    ///
    /// Extra work on deletion belongs in the delete hooks.
    pub async fn delete<M: Model>(&self, model: &mut M) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.delete_with_ctx(&ctx, model).await
    }

    pub async fn delete_with_ctx<M: Model>(&self, ctx: &Ctx, model: &mut M) -> OdmResult<()> {
        hooks::before_delete(ctx, model).await?;

        let id = model.id();
        debug!(collection = %self.name, id = %id, "Deleting document");

        let result = ctx
            .run(self.backend.delete_one(ctx, &self.name, doc! { field::ID: id }))
            .await?;

        hooks::after_delete(ctx, &result, model).await
    }

    /// Counts the documents matching `filter`.
    pub async fn count_documents(
        &self,
        filter: Document,
        options: impl Into<Option<CountOptions>>,
    ) -> OdmResult<u64> {
        let (ctx, _cancel) = self.config.ctx();
        self.count_documents_with_ctx(&ctx, filter, options).await
    }

    pub async fn count_documents_with_ctx(
        &self,
        ctx: &Ctx,
        filter: Document,
        options: impl Into<Option<CountOptions>>,
    ) -> OdmResult<u64> {
        ctx.run(self.backend.count_documents(
            ctx,
            &self.name,
            filter,
            options.into().unwrap_or_default(),
        ))
        .await
    }

    /// Returns a raw document stream over every document matching `filter`.
    ///
    /// The context bounds opening the stream, not consuming it.
    pub async fn find(
        &self,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> OdmResult<DocumentStream> {
        let (ctx, _cancel) = self.config.ctx();
        self.find_with_ctx(&ctx, filter, options).await
    }

    pub async fn find_with_ctx(
        &self,
        ctx: &Ctx,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> OdmResult<DocumentStream> {
        ctx.run(self.backend.find(
            ctx,
            &self.name,
            filter,
            options.into().unwrap_or_default(),
        ))
        .await
    }

    /// Returns the first raw document matching `filter`, if any.
    pub async fn find_one(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<Option<Document>> {
        let (ctx, _cancel) = self.config.ctx();
        self.find_one_with_ctx(&ctx, filter, options).await
    }

    pub async fn find_one_with_ctx(
        &self,
        ctx: &Ctx,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> OdmResult<Option<Document>> {
        ctx.run(self.backend.find_one(
            ctx,
            &self.name,
            filter,
            options.into().unwrap_or_default(),
        ))
        .await
    }

    /// Runs a raw aggregation pipeline.
    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> OdmResult<DocumentStream> {
        let (ctx, _cancel) = self.config.ctx();
        self.aggregate_with_ctx(&ctx, pipeline, options).await
    }

    pub async fn aggregate_with_ctx(
        &self,
        ctx: &Ctx,
        pipeline: Vec<Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> OdmResult<DocumentStream> {
        debug!(collection = %self.name, stages = pipeline.len(), "Running aggregation");

        ctx.run(self.backend.aggregate(
            ctx,
            &self.name,
            pipeline,
            options.into().unwrap_or_default(),
        ))
        .await
    }

    /// Inserts several values without running model hooks.
    pub async fn insert_many<T, I>(&self, documents: I) -> OdmResult<InsertManyResult>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let (ctx, _cancel) = self.config.ctx();
        self.insert_many_with_ctx(&ctx, documents).await
    }

    pub async fn insert_many_with_ctx<T, I>(&self, ctx: &Ctx, documents: I) -> OdmResult<InsertManyResult>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let documents = documents
            .into_iter()
            .map(|document| serialize_to_document(&document))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(collection = %self.name, count = documents.len(), "Inserting documents");

        ctx.run(self.backend.insert_many(ctx, &self.name, documents))
            .await
    }

    /// Deletes every document matching `filter` without running model hooks.
    pub async fn delete_many(&self, filter: Document) -> OdmResult<DeleteResult> {
        let (ctx, _cancel) = self.config.ctx();
        self.delete_many_with_ctx(&ctx, filter).await
    }

    pub async fn delete_many_with_ctx(&self, ctx: &Ctx, filter: Document) -> OdmResult<DeleteResult> {
        debug!(collection = %self.name, filter = %filter, "Deleting documents");

        ctx.run(self.backend.delete_many(ctx, &self.name, filter))
            .await
    }

    /// Finds every document matching `filter` and decodes them into `results`,
    /// replacing its previous contents.
    pub async fn simple_find<T: DeserializeOwned>(
        &self,
        results: &mut Vec<T>,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> OdmResult<()> {
        let (ctx, _cancel) = self.config.ctx();
        self.simple_find_with_ctx(&ctx, results, filter, options).await
    }

    pub async fn simple_find_with_ctx<T: DeserializeOwned>(
        &self,
        ctx: &Ctx,
        results: &mut Vec<T>,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> OdmResult<()> {
        let options = options.into().unwrap_or_default();

        *results = ctx
            .run(async {
                decode_all(
                    self.backend
                        .find(ctx, &self.name, filter, options)
                        .await?,
                )
                .await
            })
            .await?;

        Ok(())
    }

    /// Runs the stages and decodes every result into `results`, replacing its contents.
    ///
    /// Builder operators are wrapped into stage documents; raw documents are used as is.
    pub async fn simple_aggregate<T, I>(&self, results: &mut Vec<T>, stages: I) -> OdmResult<()>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        let (ctx, _cancel) = self.config.ctx();
        self.simple_aggregate_with_ctx(&ctx, results, stages).await
    }

    pub async fn simple_aggregate_with_ctx<T, I>(
        &self,
        ctx: &Ctx,
        results: &mut Vec<T>,
        stages: I,
    ) -> OdmResult<()>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        let stages = pipeline(stages);

        *results = ctx
            .run(async {
                decode_all(
                    self.backend
                        .aggregate(ctx, &self.name, stages, AggregateOptions::default())
                        .await?,
                )
                .await
            })
            .await?;

        Ok(())
    }

    /// Runs the stages and decodes the first result into `result`.
    ///
    /// Returns `Ok(false)` and leaves `result` untouched when the aggregation yields nothing.
    pub async fn simple_aggregate_first<T, I>(&self, result: &mut T, stages: I) -> OdmResult<bool>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        let (ctx, _cancel) = self.config.ctx();
        self.simple_aggregate_first_with_ctx(&ctx, result, stages).await
    }

    pub async fn simple_aggregate_first_with_ctx<T, I>(
        &self,
        ctx: &Ctx,
        result: &mut T,
        stages: I,
    ) -> OdmResult<bool>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        let stages = pipeline(stages);

        let first = ctx
            .run(async {
                self.backend
                    .aggregate(ctx, &self.name, stages, AggregateOptions::default())
                    .await?
                    .try_next()
                    .await
            })
            .await?;

        match first {
            Some(document) => {
                *result = deserialize_from_document(document)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the stages and returns the raw result stream.
    pub async fn simple_aggregate_cursor<I>(&self, stages: I) -> OdmResult<DocumentStream>
    where
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        let (ctx, _cancel) = self.config.ctx();
        self.simple_aggregate_cursor_with_ctx(&ctx, stages).await
    }

    pub async fn simple_aggregate_cursor_with_ctx<I>(&self, ctx: &Ctx, stages: I) -> OdmResult<DocumentStream>
    where
        I: IntoIterator,
        I::Item: Into<StageInput>,
    {
        self.aggregate_with_ctx(ctx, pipeline(stages), None).await
    }
}

async fn decode_all<T: DeserializeOwned>(stream: DocumentStream) -> OdmResult<Vec<T>> {
    stream
        .and_then(|document| async move { deserialize_from_document::<T>(document).map_err(OdmError::from) })
        .try_collect()
        .await
}

//! In-memory storage implementation of [`StoreBackend`].
//!
//! Documents are kept per collection in insertion order behind an async-aware
//! read-write lock and evaluated with the engine in [`crate::evaluator`] and
//! [`crate::pipeline`].

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use tracing::debug;

use odmlayer_core::{
    backend::{
        AggregateOptions, CountOptions, DeleteResult, DocumentStream, FindOneOptions, FindOptions,
        InsertManyResult, StoreBackend, UpdateOptions, UpdateResult,
    },
    context::Ctx,
    error::{OdmError, OdmResult},
    field,
};

use crate::{
    error::MemoryError,
    evaluator::{apply_update, matches, project, sort_documents, upsert_seed, values_equal},
    pipeline::{Collections, run_pipeline},
};

/// Session handle bound to the contexts of an in-memory transaction.
#[derive(Debug)]
struct MemorySession {
    id: u64,
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state; clones share the
/// same data. Queries scan every document of a collection.
///
/// Transactions snapshot the whole store when they start and restore the snapshot when
/// they abort. Writes are not isolated from concurrent work outside the transaction, so
/// an abort also discards those.
///
/// # Example
///
/// ```ignore
/// use odmlayer_memory::InMemoryStore;
/// use odmlayer::{backend::StoreBackend, bson::doc, context::Ctx};
///
/// let store = InMemoryStore::new();
/// let ctx = Ctx::background();
///
/// let id = store.insert_one(&ctx, "users", doc! { "name": "Alice", "age": 30 }).await?;
/// let found = store.find_one(&ctx, "users", doc! { "_id": id }, Default::default()).await?;
/// assert!(found.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<Collections>>,
    /// session id -> snapshot taken when its transaction started
    transactions: Arc<RwLock<HashMap<u64, Collections>>>,
    next_session: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns a copy of every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn session_id(ctx: &Ctx) -> OdmResult<u64> {
        ctx.session::<MemorySession>()
            .map(|session| session.id)
            .ok_or_else(|| OdmError::backend(MemoryError::NoTransaction))
    }
}

fn select(documents: &[Document], filter: &Document) -> OdmResult<Vec<Document>> {
    let mut selected = Vec::new();

    for document in documents {
        if matches(document, filter)? {
            selected.push(document.clone());
        }
    }

    Ok(selected)
}

fn find_documents(documents: &[Document], filter: &Document, options: &FindOptions) -> OdmResult<Vec<Document>> {
    let mut selected = select(documents, filter)?;

    if let Some(sort) = &options.sort {
        sort_documents(&mut selected, sort)?;
    }

    // A negative limit is a single-batch limit of the same size.
    let limit = match options.limit {
        Some(0) | None => usize::MAX,
        Some(limit) => limit.unsigned_abs() as usize,
    };

    selected
        .into_iter()
        .skip(options.skip.unwrap_or(0) as usize)
        .take(limit)
        .map(|document| match &options.projection {
            Some(projection) => project(&document, projection),
            None => Ok(document),
        })
        .collect()
}

fn insert_into(collection: &str, documents: &mut Vec<Document>, document: Document) -> OdmResult<Bson> {
    let document = match document.get(field::ID) {
        Some(_) => document,
        None => {
            let mut with_id = Document::new();
            with_id.insert(field::ID, ObjectId::new());
            for (key, value) in document {
                with_id.insert(key, value);
            }
            with_id
        },
    };

    let id = document
        .get(field::ID)
        .cloned()
        .unwrap_or(Bson::Null);

    let duplicate = documents
        .iter()
        .any(|existing| existing.get(field::ID).is_some_and(|existing| values_equal(existing, &id)));

    if duplicate {
        return Err(OdmError::backend(MemoryError::DuplicateKey {
            collection: collection.to_string(),
            id,
        }));
    }

    documents.push(document);

    Ok(id)
}

fn into_stream(documents: Vec<Document>) -> DocumentStream {
    stream::iter(documents.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(&self, _ctx: &Ctx, collection: &str, document: Document) -> OdmResult<Bson> {
        debug!(collection, "Inserting document");

        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        insert_into(collection, documents, document)
    }

    async fn insert_many(
        &self,
        _ctx: &Ctx,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<InsertManyResult> {
        debug!(collection, count = documents.len(), "Inserting documents");

        let mut store = self.store.write().await;
        let existing = store
            .entry(collection.to_string())
            .or_default();

        let mut inserted_ids = HashMap::with_capacity(documents.len());

        // Ordered insert: documents before the first failure stay inserted.
        for (index, document) in documents.into_iter().enumerate() {
            inserted_ids.insert(index, insert_into(collection, existing, document)?);
        }

        Ok(InsertManyResult { inserted_ids })
    }

    async fn find_one(
        &self,
        _ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOneOptions,
    ) -> OdmResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(None);
        };

        let options = FindOptions {
            sort: options.sort,
            skip: options.skip,
            limit: Some(1),
            projection: options.projection,
        };

        Ok(find_documents(documents, &filter, &options)?
            .into_iter()
            .next())
    }

    async fn find(
        &self,
        _ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentStream> {
        let store = self.store.read().await;
        let found = match store.get(collection) {
            Some(documents) => find_documents(documents, &filter, &options)?,
            None => Vec::new(),
        };

        Ok(into_stream(found))
    }

    async fn update_one(
        &self,
        _ctx: &Ctx,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> OdmResult<UpdateResult> {
        debug!(collection, "Updating document");

        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        let mut position = None;
        for (index, document) in documents.iter().enumerate() {
            if matches(document, &filter)? {
                position = Some(index);
                break;
            }
        }

        match position {
            Some(index) => {
                let mut updated = documents[index].clone();
                apply_update(&mut updated, &update)?;

                let modified = updated != documents[index];
                documents[index] = updated;

                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: modified as u64,
                    upserted_id: None,
                })
            },
            None if options.upsert.unwrap_or(false) => {
                let mut seed = upsert_seed(&filter);
                apply_update(&mut seed, &update)?;
                let id = insert_into(collection, documents, seed)?;

                Ok(UpdateResult {
                    matched_count: 0,
                    modified_count: 0,
                    upserted_id: Some(id),
                })
            },
            None => Ok(UpdateResult::default()),
        }
    }

    async fn delete_one(&self, _ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        debug!(collection, "Deleting document");

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        for index in 0..documents.len() {
            if matches(&documents[index], &filter)? {
                documents.remove(index);
                return Ok(DeleteResult { deleted_count: 1 });
            }
        }

        Ok(DeleteResult::default())
    }

    async fn delete_many(&self, _ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        debug!(collection, "Deleting documents");

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        // Evaluate every filter before removing anything.
        let flags = documents
            .iter()
            .map(|document| matches(document, &filter))
            .collect::<OdmResult<Vec<bool>>>()?;
        let deleted_count = flags.iter().filter(|matched| **matched).count() as u64;

        let mut flags = flags.into_iter();
        documents.retain(|_| !flags.next().unwrap_or(false));

        Ok(DeleteResult { deleted_count })
    }

    async fn count_documents(
        &self,
        _ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: CountOptions,
    ) -> OdmResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        let matched = select(documents, &filter)?.len() as u64;
        let remaining = matched.saturating_sub(options.skip.unwrap_or(0));

        Ok(match options.limit {
            Some(limit) if limit > 0 => remaining.min(limit),
            _ => remaining,
        })
    }

    async fn aggregate(
        &self,
        _ctx: &Ctx,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> OdmResult<DocumentStream> {
        debug!(collection, stages = pipeline.len(), ?options, "Running aggregation");

        let store = self.store.read().await;
        let documents = store
            .get(collection)
            .cloned()
            .unwrap_or_default();

        Ok(into_stream(run_pipeline(&store, documents, &pipeline)?))
    }

    async fn start_transaction(&self, ctx: &Ctx) -> OdmResult<Ctx> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.store.read().await.clone();

        self.transactions
            .write()
            .await
            .insert(id, snapshot);

        debug!(session = id, "Started in-memory transaction");

        Ok(ctx.with_session(Arc::new(MemorySession { id })))
    }

    async fn commit_transaction(&self, ctx: &Ctx) -> OdmResult<()> {
        let id = Self::session_id(ctx)?;

        match self.transactions.write().await.remove(&id) {
            Some(_) => {
                debug!(session = id, "Committed in-memory transaction");
                Ok(())
            },
            None => Err(OdmError::backend(MemoryError::NoTransaction)),
        }
    }

    async fn abort_transaction(&self, ctx: &Ctx) -> OdmResult<()> {
        let id = Self::session_id(ctx)?;
        let snapshot = self.transactions.write().await.remove(&id);

        match snapshot {
            Some(snapshot) => {
                *self.store.write().await = snapshot;
                debug!(session = id, "Aborted in-memory transaction");
                Ok(())
            },
            None => Err(OdmError::backend(MemoryError::NoTransaction)),
        }
    }

    async fn transaction_in_progress(&self, ctx: &Ctx) -> bool {
        match Self::session_id(ctx) {
            Ok(id) => self.transactions.read().await.contains_key(&id),
            Err(_) => false,
        }
    }

    async fn end_session(&self, ctx: &Ctx) -> OdmResult<()> {
        if self.transaction_in_progress(ctx).await {
            self.abort_transaction(ctx).await?;
        }

        Ok(())
    }

    async fn shutdown(self) -> OdmResult<()> {
        self.store.write().await.clear();
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances, optionally seeded with documents.
///
/// # Example
///
/// ```ignore
/// let store = InMemoryStore::builder()
///     .seed("users", vec![doc! { "name": "Alice" }])
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    seed: Collections,
}

impl InMemoryStoreBuilder {
    /// Adds documents to `collection`; `_id` is generated for documents without one.
    pub fn seed(mut self, collection: &str, documents: Vec<Document>) -> Self {
        self.seed
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        self
    }

    /// Builds the store.
    ///
    /// # Errors
    ///
    /// Returns a backend error when two seeded documents share an `_id`.
    pub fn build(self) -> OdmResult<InMemoryStore> {
        let mut collections = Collections::new();

        for (name, documents) in self.seed {
            let target = collections.entry(name.clone()).or_default();

            for document in documents {
                insert_into(&name, target, document)?;
            }
        }

        Ok(InMemoryStore {
            store: Arc::new(RwLock::new(collections)),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn insert_generates_id_first() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();

        let id = store
            .insert_one(&ctx, "books", doc! { "name": "Dune" })
            .await
            .unwrap();

        let documents = store.documents("books").await;
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(documents[0].keys().next().map(String::as_str), Some("_id"));
    }

    #[tokio::test]
    async fn duplicate_id_is_backend_error() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();

        store.insert_one(&ctx, "books", doc! { "_id": 1 }).await.unwrap();
        let err = store
            .insert_one(&ctx, "books", doc! { "_id": 1 })
            .await
            .unwrap_err();

        assert!(matches!(err.backend_error::<MemoryError>(), Some(MemoryError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn find_applies_options() {
        let store = InMemoryStore::builder()
            .seed("n", (1..=5).map(|n| doc! { "_id": n, "even": n % 2 == 0 }).collect())
            .build()
            .unwrap();
        let ctx = Ctx::background();

        let found = store
            .find(
                &ctx,
                "n",
                doc! { "even": false },
                FindOptions {
                    sort: Some(doc! { "_id": -1 }),
                    skip: Some(1),
                    limit: Some(1),
                    projection: Some(doc! { "even": 0 }),
                },
            )
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "_id": 3 }]);
        assert_eq!(
            store
                .count_documents(&ctx, "n", doc! {}, CountOptions { skip: Some(1), limit: Some(3) })
                .await
                .unwrap(),
            3,
        );
    }

    #[tokio::test]
    async fn update_reports_counts_and_upserts() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();
        store.insert_one(&ctx, "c", doc! { "_id": 1, "v": 1 }).await.unwrap();

        let unchanged = store
            .update_one(&ctx, "c", doc! { "_id": 1 }, doc! { "$set": { "v": 1 } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!((unchanged.matched_count, unchanged.modified_count), (1, 0));

        let missing = store
            .update_one(&ctx, "c", doc! { "_id": 2 }, doc! { "$set": { "v": 2 } }, UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(missing, UpdateResult::default());

        let upserted = store
            .update_one(
                &ctx,
                "c",
                doc! { "_id": 2 },
                doc! { "$set": { "v": 2 } },
                UpdateOptions { upsert: Some(true) },
            )
            .await
            .unwrap();
        assert_eq!(upserted.upserted_id, Some(Bson::Int32(2)));
        assert_eq!(store.documents("c").await[1], doc! { "_id": 2, "v": 2 });
    }

    #[tokio::test]
    async fn delete_one_and_many() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();
        for n in 0..4 {
            store.insert_one(&ctx, "c", doc! { "n": n % 2 }).await.unwrap();
        }

        let one = store.delete_one(&ctx, "c", doc! { "n": 0 }).await.unwrap();
        let many = store.delete_many(&ctx, "c", doc! { "n": 1 }).await.unwrap();

        assert_eq!((one.deleted_count, many.deleted_count), (1, 2));
        assert_eq!(store.documents("c").await.len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_many_keeps_every_document() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();
        for n in 0..3 {
            store.insert_one(&ctx, "c", doc! { "n": n }).await.unwrap();
        }

        let err = store
            .delete_many(&ctx, "c", doc! { "n": { "$regex": "x" } })
            .await
            .unwrap_err();

        assert!(matches!(err, OdmError::Unsupported(_)));
        assert_eq!(store.documents("c").await.len(), 3);
    }

    #[tokio::test]
    async fn overflowing_increment_is_rejected() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();
        store.insert_one(&ctx, "c", doc! { "_id": 1, "v": i64::MAX }).await.unwrap();

        let result = store
            .update_one(&ctx, "c", doc! { "_id": 1 }, doc! { "$inc": { "v": 1_i64 } }, UpdateOptions::default())
            .await;

        assert!(result.is_err());
        assert_eq!(store.documents("c").await[0], doc! { "_id": 1, "v": i64::MAX });
    }

    #[tokio::test]
    async fn abort_restores_snapshot() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();
        store.insert_one(&ctx, "c", doc! { "_id": 1 }).await.unwrap();

        let tx = store.start_transaction(&ctx).await.unwrap();
        assert!(store.transaction_in_progress(&tx).await);
        store.insert_one(&tx, "c", doc! { "_id": 2 }).await.unwrap();
        store.abort_transaction(&tx).await.unwrap();

        assert!(!store.transaction_in_progress(&tx).await);
        assert_eq!(store.documents("c").await, vec![doc! { "_id": 1 }]);
        assert!(store.commit_transaction(&tx).await.is_err());
    }

    #[tokio::test]
    async fn commit_keeps_writes_and_end_session_is_idempotent() {
        let store = InMemoryStore::new();
        let ctx = Ctx::background();

        let tx = store.start_transaction(&ctx).await.unwrap();
        store.insert_one(&tx, "c", doc! { "_id": 1 }).await.unwrap();
        store.commit_transaction(&tx).await.unwrap();
        store.end_session(&tx).await.unwrap();

        assert_eq!(store.documents("c").await.len(), 1);
    }

    #[tokio::test]
    async fn aggregate_sees_other_collections() {
        let store = InMemoryStore::builder()
            .seed("books", vec![doc! { "_id": 1, "author": "a" }])
            .seed("authors", vec![doc! { "_id": "a", "name": "Austen" }])
            .build()
            .unwrap();

        let joined = store
            .aggregate(
                &Ctx::background(),
                "books",
                vec![
                    doc! { "$lookup": { "from": "authors", "localField": "author", "foreignField": "_id", "as": "author" } },
                    doc! { "$unwind": "$author" },
                    doc! { "$project": { "_id": 0, "name": "$author.name" } },
                ],
                AggregateOptions::default(),
            )
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(joined, vec![doc! { "name": "Austen" }]);
    }
}

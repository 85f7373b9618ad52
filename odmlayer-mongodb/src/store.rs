use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::{StreamExt, TryStreamExt, stream};
use mea::mutex::Mutex;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    options::{self, ClientOptions},
};
use tracing::{debug, info};

use odmlayer_core::{
    backend::{
        AggregateOptions, CountOptions, DeleteResult, DocumentStream, FindOneOptions, FindOptions,
        InsertManyResult, StoreBackend, UpdateOptions, UpdateResult,
    },
    config::Config,
    context::Ctx,
    error::{OdmError, OdmResult},
    store::ModelStore,
};

/// A driver session bound to the contexts of one transaction.
struct MongoSession {
    session: Mutex<ClientSession>,
    active: AtomicBool,
}

/// [`StoreBackend`] over the official MongoDB driver.
///
/// Driver errors are returned as [`OdmError::Backend`] and can be downcast to
/// [`mongodb::error::Error`].
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    /// Wraps an existing client.
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// Connects with the given client options and returns a store using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Initialization`] when the driver rejects the options.
    pub fn setup(config: Config, database: &str, options: ClientOptions) -> OdmResult<ModelStore<Self>> {
        let client = Client::with_options(options)
            .map_err(|e| OdmError::Initialization(e.to_string()))?;

        info!(database, "Connected MongoDB client");

        Ok(ModelStore::with_config(Self::new(client, database), config))
    }

    /// Returns the underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn session_of(ctx: &Ctx) -> Option<Arc<MongoSession>> {
    ctx.session::<MongoSession>()
}

fn bound_session(ctx: &Ctx) -> OdmResult<Arc<MongoSession>> {
    session_of(ctx).ok_or_else(|| OdmError::Unsupported("transaction operation without a session".to_string()))
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(&self, ctx: &Ctx, collection: &str, document: Document) -> OdmResult<Bson> {
        debug!(collection, "Inserting document");

        let coll = self.get_collection(collection);
        let action = coll.insert_one(document);
        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        };

        Ok(result.map_err(OdmError::backend)?.inserted_id)
    }

    async fn insert_many(
        &self,
        ctx: &Ctx,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<InsertManyResult> {
        debug!(collection, count = documents.len(), "Inserting documents");

        let coll = self.get_collection(collection);
        let action = coll.insert_many(documents);
        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        }
        .map_err(OdmError::backend)?;

        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids,
        })
    }

    async fn find_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOneOptions,
    ) -> OdmResult<Option<Document>> {
        let mut driver_options = options::FindOneOptions::default();
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.projection = options.projection;

        let coll = self.get_collection(collection);
        let action = coll
            .find_one(filter)
            .with_options(driver_options);

        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        };

        result.map_err(OdmError::backend)
    }

    async fn find(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<DocumentStream> {
        let mut driver_options = options::FindOptions::default();
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.limit = options.limit;
        driver_options.projection = options.projection;

        let coll = self.get_collection(collection);
        let action = coll
            .find(filter)
            .with_options(driver_options);

        match session_of(ctx) {
            // A session cursor borrows its session for every batch, so drain it here.
            Some(bound) => {
                let mut session = bound.session.lock().await;
                let mut cursor = action
                    .session(&mut *session)
                    .await
                    .map_err(OdmError::backend)?;

                let documents = cursor
                    .stream(&mut session)
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(OdmError::backend)?;

                Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
            },
            None => Ok(action
                .await
                .map_err(OdmError::backend)?
                .map_err(OdmError::backend)
                .boxed()),
        }
    }

    async fn update_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> OdmResult<UpdateResult> {
        debug!(collection, "Updating document");

        let mut driver_options = options::UpdateOptions::default();
        driver_options.upsert = options.upsert;

        let coll = self.get_collection(collection);
        let action = coll
            .update_one(filter, update)
            .with_options(driver_options);

        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        }
        .map_err(OdmError::backend)?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        debug!(collection, "Deleting document");

        let coll = self.get_collection(collection);
        let action = coll.delete_one(filter);
        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        }
        .map_err(OdmError::backend)?;

        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        debug!(collection, "Deleting documents");

        let coll = self.get_collection(collection);
        let action = coll.delete_many(filter);
        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        }
        .map_err(OdmError::backend)?;

        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn count_documents(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: CountOptions,
    ) -> OdmResult<u64> {
        let mut driver_options = options::CountOptions::default();
        driver_options.skip = options.skip;
        driver_options.limit = options.limit;

        let coll = self.get_collection(collection);
        let action = coll
            .count_documents(filter)
            .with_options(driver_options);

        let result = match session_of(ctx) {
            Some(bound) => action.session(&mut *bound.session.lock().await).await,
            None => action.await,
        };

        result.map_err(OdmError::backend)
    }

    async fn aggregate(
        &self,
        ctx: &Ctx,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> OdmResult<DocumentStream> {
        debug!(collection, stages = pipeline.len(), "Running aggregation");

        let mut driver_options = options::AggregateOptions::default();
        driver_options.allow_disk_use = options.allow_disk_use;
        driver_options.batch_size = options.batch_size;

        let coll = self.get_collection(collection);
        let action = coll
            .aggregate(pipeline)
            .with_options(driver_options);

        match session_of(ctx) {
            Some(bound) => {
                let mut session = bound.session.lock().await;
                let mut cursor = action
                    .session(&mut *session)
                    .await
                    .map_err(OdmError::backend)?;

                let documents = cursor
                    .stream(&mut session)
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(OdmError::backend)?;

                Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
            },
            None => Ok(action
                .await
                .map_err(OdmError::backend)?
                .map_err(OdmError::backend)
                .boxed()),
        }
    }

    async fn start_transaction(&self, ctx: &Ctx) -> OdmResult<Ctx> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(OdmError::backend)?;

        session
            .start_transaction()
            .await
            .map_err(OdmError::backend)?;

        debug!(database = %self.database, "Started transaction");

        Ok(ctx.with_session(Arc::new(MongoSession {
            session: Mutex::new(session),
            active: AtomicBool::new(true),
        })))
    }

    async fn commit_transaction(&self, ctx: &Ctx) -> OdmResult<()> {
        let bound = bound_session(ctx)?;
        let result = bound.session.lock().await.commit_transaction().await;

        if result.is_ok() {
            bound.active.store(false, Ordering::SeqCst);
        }

        result.map_err(OdmError::backend)
    }

    async fn abort_transaction(&self, ctx: &Ctx) -> OdmResult<()> {
        let bound = bound_session(ctx)?;
        bound.active.store(false, Ordering::SeqCst);

        bound
            .session
            .lock()
            .await
            .abort_transaction()
            .await
            .map_err(OdmError::backend)
    }

    async fn transaction_in_progress(&self, ctx: &Ctx) -> bool {
        session_of(ctx).is_some_and(|bound| bound.active.load(Ordering::SeqCst))
    }

    /// The driver session itself is released once the last context holding it is dropped.
    async fn end_session(&self, ctx: &Ctx) -> OdmResult<()> {
        if self.transaction_in_progress(ctx).await {
            self.abort_transaction(ctx).await?;
        }

        Ok(())
    }

    async fn shutdown(self) -> OdmResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Builds a [`ModelStore`] over MongoDB from a connection string.
///
/// # Example
///
/// ```ignore
/// let store = MongoDbStore::builder("mongodb://localhost:27017", "library")
///     .config(Config::with_ctx_timeout(Duration::from_secs(5)))
///     .build()
///     .await?;
/// ```
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    config: Config,
    client_options: Option<ClientOptions>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            config: Config::default(),
            client_options: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Uses these options instead of parsing the connection string.
    pub fn client_options(mut self, client_options: ClientOptions) -> Self {
        self.client_options = Some(client_options);
        self
    }

    pub async fn build(self) -> OdmResult<ModelStore<MongoDbStore>> {
        let client_options = match self.client_options {
            Some(client_options) => client_options,
            None => ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| OdmError::Initialization(e.to_string()))?,
        };

        MongoDbStore::setup(self.config, &self.database, client_options)
    }
}

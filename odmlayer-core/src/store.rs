//! The model store: a backend plus its configuration.
//!
//! [`ModelStore`] is the entry point of the ODM. It hands out [`Collection`] handles, either
//! for a model type (named after [`Model::collection_name`]) or for an arbitrary name, and
//! runs transactions.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::prelude::*;
//!
//! let store = ModelStore::new(InMemoryStore::new());
//!
//! store
//!     .transaction(|tx| async move {
//!         let books = store.coll::<Book>();
//!         books.create_with_ctx(tx.ctx(), &mut book).await?;
//!         tx.commit().await
//!     })
//!     .await?;
//! ```

use std::future::Future;

use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    collection::Collection,
    config::Config,
    context::{CancelGuard, Ctx},
    error::OdmResult,
    model::Model,
};

/// A store bound to a specific backend implementation.
#[derive(Debug)]
pub struct ModelStore<B: StoreBackend> {
    backend: B,
    config: Config,
}

impl<B: StoreBackend> ModelStore<B> {
    /// Creates a store with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, Config::default())
    }

    /// Creates a store with the given configuration.
    pub fn with_config(backend: B, config: Config) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the collection of model `M`.
    pub fn coll<'a, M: Model>(&'a self) -> Collection<'a, B> {
        self.collection(M::collection_name())
    }

    /// Returns the collection with the given name.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend, &self.config)
    }

    /// Creates a context bounded by the configured default timeout.
    pub fn ctx(&self) -> (Ctx, CancelGuard) {
        self.config.ctx()
    }

    /// Runs `f` inside a transaction under a default context.
    ///
    /// See [`ModelStore::transaction_with_ctx`].
    pub async fn transaction<'a, F, Fut, T>(&'a self, f: F) -> OdmResult<T>
    where
        F: FnOnce(Transaction<'a, B>) -> Fut,
        Fut: Future<Output = OdmResult<T>>,
    {
        let (ctx, _cancel) = self.ctx();
        self.transaction_with_ctx(&ctx, f).await
    }

    /// Starts a session and transaction derived from `ctx`, then runs `f`.
    ///
    /// The closure decides the outcome by calling [`Transaction::commit`] or
    /// [`Transaction::abort`]. When it returns an error while the transaction is still
    /// open, the transaction is aborted. The session is ended in every case and the
    /// closure's result is returned.
    ///
    /// Starting, committing and aborting are bounded by `ctx`. The abort after an error
    /// and the session end are not, so they still run once `ctx` has expired.
    pub async fn transaction_with_ctx<'a, F, Fut, T>(&'a self, ctx: &Ctx, f: F) -> OdmResult<T>
    where
        F: FnOnce(Transaction<'a, B>) -> Fut,
        Fut: Future<Output = OdmResult<T>>,
    {
        let session_ctx = ctx.run(self.backend.start_transaction(ctx)).await?;
        debug!("Started transaction");

        let result = f(Transaction {
            backend: &self.backend,
            ctx: session_ctx.clone(),
        })
        .await;

        if let Err(err) = &result {
            if self.backend.transaction_in_progress(&session_ctx).await {
                warn!(error = %err, "Aborting transaction after error");

                if let Err(abort_err) = self.backend.abort_transaction(&session_ctx).await {
                    warn!(error = %abort_err, "Failed to abort transaction");
                }
            }
        }

        let ended = self.backend.end_session(&session_ctx).await;
        let value = result?;
        ended?;

        Ok(value)
    }

    /// Releases the backend.
    pub async fn shutdown(self) -> OdmResult<()> {
        self.backend.shutdown().await
    }
}

/// An open transaction handed to the closure of [`ModelStore::transaction`].
///
/// Pass [`Transaction::ctx`] to the `_with_ctx` collection operations to run them
/// inside the transaction.
#[derive(Debug)]
pub struct Transaction<'a, B: StoreBackend> {
    backend: &'a B,
    ctx: Ctx,
}

impl<B: StoreBackend> Transaction<'_, B> {
    /// The context bound to the transaction's session.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    pub async fn commit(&self) -> OdmResult<()> {
        self.ctx.run(self.backend.commit_transaction(&self.ctx)).await
    }

    pub async fn abort(&self) -> OdmResult<()> {
        self.ctx.run(self.backend.abort_transaction(&self.ctx)).await
    }
}

//! A thin object-document mapping layer over MongoDB.
//!
//! This crate is the entry point of the odmlayer project. It re-exports the model contract,
//! collections, the store and the pipeline builders from `odmlayer-core`, the
//! `#[derive(Model)]` macro, and the storage backends.
//!
//! Every collection operation comes in two forms: a plain one bounded by the store's
//! default timeout (10 seconds unless configured otherwise) and a `_with_ctx` twin taking
//! a caller-provided [`context::Ctx`].
//!
//! # Quick Start
//!
//! ```ignore
//! use odmlayer::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Model)]
//! pub struct Book {
//!     #[serde(flatten)]
//!     #[model(base)]
//!     pub base: DefaultModel,
//!     pub name: String,
//!     pub pages: i32,
//! }
//!
//! impl ModelHooks for Book {}
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let store = ModelStore::new(InMemoryStore::new());
//!     let books = store.coll::<Book>();
//!
//!     let mut book = Book { name: "Dune".into(), pages: 412, ..Default::default() };
//!     books.create(&mut book).await?;
//!
//!     book.pages = 604;
//!     books.update(&mut book).await?;
//!
//!     let mut found = Book::default();
//!     books.find_by_id(book.id(), &mut found, None).await?;
//!
//!     let mut long_books: Vec<Book> = Vec::new();
//!     books
//!         .simple_aggregate(&mut long_books, [builder::match_(doc! { "pages": { operator::GT: 500 } })])
//!         .await?;
//!
//!     books.delete(&mut found).await?;
//!     store.shutdown().await
//! }
//! ```
//!
//! # Hooks
//!
//! Implement the methods of [`model::ModelHooks`] a model needs. Before-hooks abort the
//! operation by returning an error; after-hooks run once the write succeeded.
//!
//! ```ignore
//! #[odmlayer::async_trait]
//! impl ModelHooks for Book {
//!     async fn before_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
//!         if self.name.is_empty() {
//!             return Err(OdmError::hook("a book needs a name"));
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! let store = &store;
//! store
//!     .transaction(|tx| async move {
//!         store.coll::<Book>().create_with_ctx(tx.ctx(), &mut book).await?;
//!         tx.commit().await
//!     })
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - The official MongoDB driver (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as odmlayer;

pub mod prelude;

pub use odmlayer_core::{
    backend, builder, collection, config, context, error, field, hooks, model, operator, store,
};
pub use odmlayer_macros::Model;

pub use async_trait::async_trait;
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use odmlayer_memory::{InMemoryStore, InMemoryStoreBuilder, MemoryError};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use odmlayer_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}

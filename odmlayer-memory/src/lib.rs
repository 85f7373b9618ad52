//! In-memory storage backend for odmlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It understands the subset of MongoDB filters, updates and aggregation stages that
//! applications built on odmlayer typically use, which makes it suitable for tests and
//! local development without a running server.
//!
//! # Quick Start
//!
//! ```ignore
//! use odmlayer::prelude::*;
//! use odmlayer::memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let store = ModelStore::new(InMemoryStore::new());
//!
//!     let mut book = Book { name: "Dune".into(), pages: 412, ..Default::default() };
//!     store.coll::<Book>().create(&mut book).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as odmlayer_memory;

pub mod error;
mod evaluator;
mod pipeline;
pub mod store;

pub use error::MemoryError;
pub use store::{InMemoryStore, InMemoryStoreBuilder};

//! A thin object-document mapping layer over MongoDB-style document stores.
//!
//! This crate is the core of the odmlayer project and provides:
//!
//! - **Models** ([`model`]) - The model contract, lifecycle hooks and the default model bases
//! - **Collections** ([`collection`]) - Create/update/delete with hooks, lookups and simple helpers
//! - **Store** ([`store`]) - The entry point handing out collections and running transactions
//! - **Store backend abstraction** ([`backend`]) - The trait database drivers are adapted to
//! - **Contexts** ([`context`]) - Deadlines, cancellation and session binding for every call
//! - **Configuration** ([`config`]) - The default context timeout
//! - **Pipeline builders** ([`builder`]) - Helpers producing aggregation stage and expression operators
//! - **Names** ([`field`], [`operator`]) - Well-known field names and query operator keywords
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::prelude::*;
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
//! let store = ModelStore::new(backend);
//! let mut book = Book { name: "Dune".into(), pages: 412, ..Default::default() };
//! store.coll::<Book>().create(&mut book).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as odmlayer_core;

pub mod backend;
pub mod builder;
pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod hooks;
pub mod model;
pub mod operator;
pub mod store;

pub use bson;

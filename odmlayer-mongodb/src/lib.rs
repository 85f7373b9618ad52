//! MongoDB backend implementation for odmlayer.
//!
//! This crate implements the `StoreBackend` trait on top of the official MongoDB driver.
//! Every operation runs inside the transaction session bound to its context, if any, and
//! driver errors are passed through unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! odmlayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! A store is created from a connection string through the builder, from driver
//! `ClientOptions` through [`MongoDbStore::setup`], or around an existing client with
//! [`MongoDbStore::new`].
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::{config::Config, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "library")
//!         .config(Config::default())
//!         .build()
//!         .await?;
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as odmlayer_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};

//! The model contract and the default model base.
//!
//! A model is any serde type stored in one collection with a unique `_id`. Models embed
//! a base ([`DefaultModel`] or [`IdField`]) with `#[serde(flatten)]` and derive [`Model`]
//! through `#[derive(Model)]`, which delegates the identifier capabilities to that base.
//! Lifecycle callbacks live in [`ModelHooks`]; every hook is optional.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! #[model(collection = "books")]
//! pub struct Book {
//!     #[serde(flatten)]
//!     #[model(base)]
//!     pub base: DefaultModel,
//!     pub name: String,
//!     pub pages: i32,
//! }
//!
//! #[async_trait::async_trait]
//! impl ModelHooks for Book {
//!     async fn before_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
//!         if self.name.is_empty() {
//!             return Err(OdmError::hook("a book needs a name"));
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use bson::{Bson, DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    backend::{DeleteResult, UpdateResult},
    context::Ctx,
    error::{OdmError, OdmResult},
};

/// Optional lifecycle callbacks of a model.
///
/// Before-hooks run ahead of the backend call and abort it by returning an error.
/// After-hooks run only once the backend call succeeded; an error they return is
/// reported to the caller although the write is already persisted.
#[async_trait]
pub trait ModelHooks: Send + Sync {
    async fn before_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    async fn after_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    async fn before_update(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    /// Receives the raw write result; a zero `matched_count` is not treated as an error.
    async fn after_update(&mut self, _ctx: &Ctx, _result: &UpdateResult) -> OdmResult<()> {
        Ok(())
    }

    /// Runs before both create and update, after the specific before-hook.
    async fn before_save(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    /// Runs after both create and update, after the specific after-hook.
    async fn after_save(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    async fn before_delete(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        Ok(())
    }

    /// Receives the raw write result; a zero `deleted_count` is not treated as an error.
    async fn after_delete(&mut self, _ctx: &Ctx, _result: &DeleteResult) -> OdmResult<()> {
        Ok(())
    }
}

/// Core trait every persisted entity implements.
pub trait Model: ModelHooks + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the name of the collection this model is stored in.
    fn collection_name() -> &'static str;

    /// Returns the identifier, or `Bson::Null` when none was assigned yet.
    fn id(&self) -> Bson;

    /// Assigns the identifier, e.g. the one generated by the backend on insert.
    fn set_id(&mut self, id: Bson);

    /// Converts a raw value into this model's identifier type.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidId`] when `raw` cannot be converted.
    fn prepare_id(&self, raw: Bson) -> OdmResult<Bson>;

    /// Bookkeeping run before the create hooks.
    fn on_creating(&mut self) {}

    /// Bookkeeping run before the create and update hooks.
    fn on_saving(&mut self) {}
}

/// Capabilities of an embeddable model base.
///
/// `#[derive(Model)]` forwards the [`Model`] identifier methods to the field marked
/// `#[model(base)]`, which must implement this trait.
pub trait ModelBase {
    fn id(&self) -> Bson;

    fn set_id(&mut self, id: Bson);

    fn prepare_id(&self, raw: Bson) -> OdmResult<Bson>;

    fn on_creating(&mut self) {}

    fn on_saving(&mut self) {}
}

/// Converts a hex string into an [`ObjectId`]; any other value is returned unchanged.
///
/// # Errors
///
/// Returns [`OdmError::InvalidId`] for strings that are not 24 hex characters.
pub fn prepare_object_id(raw: Bson) -> OdmResult<Bson> {
    match raw {
        Bson::String(hex) => ObjectId::parse_str(&hex)
            .map(Bson::ObjectId)
            .map_err(|e| OdmError::InvalidId(format!("{hex}: {e}"))),
        other => Ok(other),
    }
}

fn assign_object_id(slot: &mut Option<ObjectId>, id: Bson) {
    match id {
        Bson::ObjectId(oid) => *slot = Some(oid),
        Bson::Null => *slot = None,
        other => tracing::warn!(id = %other, "Ignoring non-ObjectId identifier"),
    }
}

/// A model base holding only an `ObjectId` identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdField {
    /// Omitted from the stored document while unset so the backend generates one.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
}

impl ModelBase for IdField {
    fn id(&self) -> Bson {
        self.id.map(Bson::ObjectId).unwrap_or(Bson::Null)
    }

    fn set_id(&mut self, id: Bson) {
        assign_object_id(&mut self.id, id);
    }

    fn prepare_id(&self, raw: Bson) -> OdmResult<Bson> {
        prepare_object_id(raw)
    }
}

/// A model base with an `ObjectId` identifier and creation/update timestamps.
///
/// `created_at` is set when the model is created; `updated_at` is refreshed on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultModel {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Default for DefaultModel {
    fn default() -> Self {
        Self {
            id: None,
            created_at: DateTime::from_millis(0),
            updated_at: DateTime::from_millis(0),
        }
    }
}

impl ModelBase for DefaultModel {
    fn id(&self) -> Bson {
        self.id.map(Bson::ObjectId).unwrap_or(Bson::Null)
    }

    fn set_id(&mut self, id: Bson) {
        assign_object_id(&mut self.id, id);
    }

    fn prepare_id(&self, raw: Bson) -> OdmResult<Bson> {
        prepare_object_id(raw)
    }

    fn on_creating(&mut self) {
        let now = DateTime::now();
        self.created_at = now;
        self.updated_at = now;
    }

    fn on_saving(&mut self) {
        self.updated_at = DateTime::now();
    }
}

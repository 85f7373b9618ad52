//! Field names of the default model.

/// Identifier field.
pub const ID: &str = "_id";

/// Creation timestamp field.
pub const CREATED_AT: &str = "created_at";

/// Last update timestamp field.
pub const UPDATED_AT: &str = "updated_at";

//! Procedural macros for the odmlayer project.
//!
//! `#[derive(Model)]` implements `odmlayer::model::Model` for a struct embedding a model
//! base (`DefaultModel` or `IdField`):
//!
//! ```ignore
//! #[derive(Debug, Default, Serialize, Deserialize, Model)]
//! #[model(collection = "library_books")]
//! pub struct Book {
//!     #[serde(flatten)]
//!     #[model(base)]
//!     pub base: DefaultModel,
//!     pub name: String,
//! }
//!
//! impl ModelHooks for Book {}
//! ```
//!
//! Without `collection`, the name is the plural snake case of the type name (`Book` is
//! stored in `books`). Without `#[model(base)]`, the field whose type is named
//! `DefaultModel` or `IdField` is used.

mod derive_model;
mod prelude;
mod utils;

fn expand<F: FnOnce(proc_macro2::TokenStream) -> syn::Result<proc_macro2::TokenStream>>(
    fun: F,
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    fun(input.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(Model, attributes(model))]
pub fn model(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    expand(derive_model::derive_model, input)
}

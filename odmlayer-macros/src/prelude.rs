pub(crate) use crate::utils::krate;
pub use heck::ToSnakeCase;
pub use proc_macro2::{Span, TokenStream};
pub use quote::quote;
pub use syn::{
    Attribute, Data, DeriveInput, Error, Fields, Ident, LitStr, Result, Type, parse2,
    spanned::Spanned,
};

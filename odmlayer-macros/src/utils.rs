use proc_macro_crate::{FoundCrate, crate_name};

use crate::prelude::*;

/// Path of the crate exposing the model traits: the `odmlayer` facade when the caller
/// depends on it, otherwise `odmlayer-core`.
///
/// Both crates declare `extern crate self` under their own name, so the absolute path
/// also resolves inside them.
pub fn krate() -> TokenStream {
    for (package, fallback) in [("odmlayer", "odmlayer"), ("odmlayer-core", "odmlayer_core")] {
        match crate_name(package) {
            Ok(FoundCrate::Name(name)) => {
                let ident = Ident::new(&name, Span::call_site());
                return quote! { ::#ident };
            },
            Ok(FoundCrate::Itself) => {
                let ident = Ident::new(fallback, Span::call_site());
                return quote! { ::#ident };
            },
            Err(_) => continue,
        }
    }

    quote! { ::odmlayer }
}

/// Pluralizes a snake case name with the common English suffix rules.
pub fn pluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last();

        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }

    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
    {
        return format!("{name}es");
    }

    format!("{name}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_common_suffixes() {
        assert_eq!(pluralize("book"), "books");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("branch"), "branches");
    }

    #[test]
    fn pluralizes_snake_case_names() {
        assert_eq!(pluralize(&"LibraryBook".to_snake_case()), "library_books");
    }
}

use crate::{prelude::*, utils::pluralize};

const BASE_TYPES: [&str; 2] = ["DefaultModel", "IdField"];

#[derive(Default)]
struct Attributes {
    collection: Option<LitStr>,
}

impl Attributes {
    fn from_attributes(attrs: &[Attribute]) -> Result<Self> {
        let mut attributes = Self::default();

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("model")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("collection") {
                    attributes.collection = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported model attribute, expected `collection`"))
                }
            })?;
        }

        Ok(attributes)
    }
}

fn is_marked_base(attrs: &[Attribute]) -> Result<bool> {
    let mut marked = false;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("model")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("base") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute, expected `base`"))
            }
        })?;
    }

    Ok(marked)
}

fn is_base_type(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| BASE_TYPES.iter().any(|name| segment.ident == name)),
        _ => false,
    }
}

pub fn derive_model(item: TokenStream) -> Result<TokenStream> {
    let input = parse2::<DeriveInput>(item)?;
    let attributes = Attributes::from_attributes(&input.attrs)?;

    let Data::Struct(data_struct) = &input.data else {
        return Err(Error::new(input.span(), "Model can only be derived for structs"));
    };
    let Fields::Named(fields_named) = &data_struct.fields else {
        return Err(Error::new_spanned(&data_struct.fields, "expected named fields"));
    };

    let mut marked = Vec::new();
    for field in &fields_named.named {
        if is_marked_base(&field.attrs)? {
            marked.push(field);
        }
    }

    let base = match marked.as_slice() {
        [field] => *field,
        [] => {
            let mut candidates = fields_named
                .named
                .iter()
                .filter(|field| is_base_type(&field.ty));

            match (candidates.next(), candidates.next()) {
                (Some(field), None) => field,
                _ => {
                    return Err(Error::new(
                        fields_named.span(),
                        "a model needs exactly one base field; mark it with `#[model(base)]`",
                    ));
                },
            }
        },
        [_, second, ..] => {
            return Err(Error::new_spanned(second, "only one field can be marked `#[model(base)]`"));
        },
    };

    let Some(base_ident) = &base.ident else {
        return Err(Error::new_spanned(base, "expected a named field"));
    };

    let collection = attributes.collection.unwrap_or_else(|| {
        LitStr::new(
            &pluralize(&input.ident.to_string().to_snake_case()),
            Span::call_site(),
        )
    });

    Ok(build(&input, base_ident, &collection))
}

fn build(input: &DeriveInput, base: &Ident, collection: &LitStr) -> TokenStream {
    let krate = krate();
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics #krate::model::Model for #ident #ty_generics #where_clause {
            fn collection_name() -> &'static str {
                #collection
            }

            fn id(&self) -> #krate::bson::Bson {
                #krate::model::ModelBase::id(&self.#base)
            }

            fn set_id(&mut self, id: #krate::bson::Bson) {
                #krate::model::ModelBase::set_id(&mut self.#base, id)
            }

            fn prepare_id(&self, raw: #krate::bson::Bson) -> #krate::error::OdmResult<#krate::bson::Bson> {
                #krate::model::ModelBase::prepare_id(&self.#base, raw)
            }

            fn on_creating(&mut self) {
                #krate::model::ModelBase::on_creating(&mut self.#base)
            }

            fn on_saving(&mut self) {
                #krate::model::ModelBase::on_saving(&mut self.#base)
            }
        }
    }
}

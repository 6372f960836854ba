#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::parse::Parse;
use syn::{Data, DeriveInput, Expr, Fields, LitStr, Token, parse_macro_input};

/// Field type names accepted by `#[field(kind = "...")]`.
const KINDS: &[(&str, &str)] = &[
    ("integer", "Integer"),
    ("float", "Float"),
    ("boolean", "Boolean"),
    ("datetime", "DateTime"),
    ("date", "Date"),
    ("time", "Time"),
    ("text", "Text"),
    ("email", "Email"),
    ("url", "Url"),
    ("ip", "Ip"),
    ("enum", "Enum"),
    ("binary", "Binary"),
    ("json", "Json"),
];

/// Strip `Option<...>`, returning the inner type text and whether it was optional.
fn unwrap_option(ty: &syn::Type) -> (String, bool) {
    let type_str = quote!(#ty).to_string().replace(' ', "");
    match type_str
        .strip_prefix("Option<")
        .and_then(|s| s.strip_suffix('>'))
    {
        Some(inner) => (inner.to_string(), true),
        None => (type_str, false),
    }
}

/// Field type implied by a Rust type when no `kind` is given.
fn kind_for_type(type_str: &str) -> &'static str {
    match type_str {
        "i64" | "i32" | "i16" | "i8" | "u32" | "u16" | "u8" | "u64" | "isize" | "usize" => {
            "Integer"
        }
        "f64" | "f32" => "Float",
        "bool" => "Boolean",
        "Vec<u8>" => "Binary",
        s if s.ends_with("serde_json::Value") || s == "Value" => "Json",
        _ => "Text",
    }
}

#[derive(Default)]
struct EntityAttr {
    name: Option<String>,
    table: Option<String>,
}

fn parse_entity_attr(input: &DeriveInput) -> syn::Result<EntityAttr> {
    let mut parsed = EntityAttr::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                parsed.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("table") {
                parsed.table = Some(meta.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(meta.error("expected `name` or `table`"));
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

/// Everything `#[field(...)]` can say about one struct field.
#[derive(Default)]
struct FieldAttr {
    kind: Option<(String, Span)>,
    required: bool,
    nullable: bool,
    skip: bool,
    default: Option<Expr>,
    min: Option<Expr>,
    max: Option<Expr>,
    min_length: Option<Expr>,
    max_length: Option<Expr>,
    regex: Option<String>,
    values: Vec<Expr>,
    column: Option<String>,
}

fn parse_field_attr(field: &syn::Field) -> syn::Result<FieldAttr> {
    let mut parsed = FieldAttr::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("required") {
                parsed.required = true;
            } else if path.is_ident("nullable") {
                parsed.nullable = true;
            } else if path.is_ident("skip") {
                parsed.skip = true;
            } else if path.is_ident("kind") {
                let lit = meta.value()?.parse::<LitStr>()?;
                parsed.kind = Some((lit.value(), lit.span()));
            } else if path.is_ident("default") {
                parsed.default = Some(meta.value()?.parse()?);
            } else if path.is_ident("min") {
                parsed.min = Some(meta.value()?.parse()?);
            } else if path.is_ident("max") {
                parsed.max = Some(meta.value()?.parse()?);
            } else if path.is_ident("min_length") {
                parsed.min_length = Some(meta.value()?.parse()?);
            } else if path.is_ident("max_length") {
                parsed.max_length = Some(meta.value()?.parse()?);
            } else if path.is_ident("regex") {
                parsed.regex = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("column") {
                parsed.column = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if path.is_ident("values") {
                let content;
                syn::parenthesized!(content in meta.input);
                let items = content.parse_terminated(Expr::parse, Token![,])?;
                parsed.values.extend(items);
            } else {
                return Err(meta.error("unsupported field option"));
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

fn field_definition(field_name: &str, ty: &syn::Type, attr: &FieldAttr) -> syn::Result<TokenStream2> {
    let (inner, optional) = unwrap_option(ty);
    let kind = match &attr.kind {
        Some((kind, span)) => KINDS
            .iter()
            .find(|(name, _)| *name == kind.as_str())
            .map(|(_, variant)| *variant)
            .ok_or_else(|| syn::Error::new(*span, format!("unknown field kind `{kind}`")))?,
        None => kind_for_type(&inner),
    };
    let kind = format_ident!("{}", kind);

    let mut chain = quote! {
        ::datamap::FieldDefinition::new(#field_name, ::datamap::FieldType::#kind)
    };
    if attr.required {
        chain.extend(quote! { .required() });
    }
    if attr.nullable || optional {
        chain.extend(quote! { .nullable() });
    }
    if let Some(default) = &attr.default {
        chain.extend(quote! { .default_value(#default) });
    }
    if let Some(min) = &attr.min {
        chain.extend(quote! { .min(#min) });
    }
    if let Some(max) = &attr.max {
        chain.extend(quote! { .max(#max) });
    }
    if let Some(len) = &attr.min_length {
        chain.extend(quote! { .min_length(#len) });
    }
    if let Some(len) = &attr.max_length {
        chain.extend(quote! { .max_length(#len) });
    }
    if let Some(regex) = &attr.regex {
        chain.extend(quote! { .regex(#regex) });
    }
    if !attr.values.is_empty() {
        let values = &attr.values;
        chain.extend(quote! { .values([#(::datamap::Value::from(#values)),*]) });
    }
    if let Some(column) = &attr.column {
        chain.extend(quote! { .column(#column) });
    }
    Ok(chain)
}

/// Derive macro for `EntitySchema`.
///
/// Declares a fieldset and table for a struct and generates typed conversion
/// to and from `datamap::Entity`.
///
/// ## Attributes
///
/// - `#[entity(name = "...", table = "...")]` on the struct. `table` is
///   required; `name` defaults to the struct name.
/// - `#[field(...)]` on fields: `kind = "email"`, `required`, `nullable`,
///   `default = expr`, `min = expr`, `max = expr`, `min_length = n`,
///   `max_length = n`, `regex = "..."`, `values(a, b, ...)`,
///   `column = "..."`, `skip`.
///
/// Without `kind` the field type follows the Rust type (integers, floats,
/// `bool`, `Vec<u8>` as binary, `serde_json::Value` as json, anything else as
/// text). `Option<T>` fields are nullable. Skipped fields are left out of the
/// fieldset and rebuilt with `Default::default()`.
///
/// ## Example
///
/// ```text
/// #[derive(EntitySchema)]
/// #[entity(name = "User", table = "users")]
/// struct User {
///     id: i64,
///     #[field(required, max_length = 80)]
///     name: String,
///     #[field(kind = "email", nullable)]
///     email: Option<String>,
///     #[field(kind = "datetime", column = "created_on")]
///     created: String,
/// }
/// ```
#[proc_macro_derive(EntitySchema, attributes(entity, field))]
pub fn derive_entity_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "EntitySchema only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "EntitySchema only supports structs",
            ));
        }
    };

    let entity = parse_entity_attr(input)?;
    let name = entity.name.unwrap_or_else(|| ident.to_string());
    let table = entity.table.ok_or_else(|| {
        syn::Error::new_spanned(ident, "missing #[entity(table = \"...\")]")
    })?;

    let mut definitions = Vec::new();
    let mut to_data = Vec::new();
    let mut from_entity = Vec::new();

    for field in fields {
        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = field_ident.to_string();
        let field_ty = &field.ty;
        let attr = parse_field_attr(field)?;

        if attr.skip {
            from_entity.push(quote! { #field_ident: ::core::default::Default::default() });
            continue;
        }

        definitions.push(field_definition(&field_name, field_ty, &attr)?);
        to_data.push(quote! {
            data.insert(#field_name.to_string(), ::datamap::Value::from(self.#field_ident));
        });
        from_entity.push(quote! {
            #field_ident: <#field_ty as ::datamap::FromValue>::from_value(&entity.get(#field_name))?
        });
    }

    Ok(quote! {
        impl ::datamap::EntitySchema for #ident {
            const NAME: &'static str = #name;
            const TABLE: &'static str = #table;

            fn fieldset() -> ::core::result::Result<::datamap::Fieldset, ::datamap::ModelError> {
                ::datamap::Fieldset::builder()
                    #(.field(#definitions))*
                    .build()
            }

            fn into_data(self) -> ::datamap::Data {
                let mut data = ::datamap::Data::new();
                #(#to_data)*
                data
            }
        }

        impl ::core::convert::TryFrom<&::datamap::Entity> for #ident {
            type Error = ::datamap::ModelError;

            fn try_from(entity: &::datamap::Entity) -> ::core::result::Result<Self, Self::Error> {
                ::core::result::Result::Ok(Self {
                    #(#from_entity),*
                })
            }
        }
    })
}

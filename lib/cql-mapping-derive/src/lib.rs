use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{
    Data, DeriveInput, Fields, GenericArgument, Lit, PathArguments, Type, parse_macro_input,
};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert PascalCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Apply a serde `rename_all` rule to a snake_case field name.
fn rename_field(name: &str, rule: &str) -> Option<String> {
    Some(match rule {
        "snake_case" | "lowercase" => name.to_string(),
        "camelCase" => to_camel_case(name),
        "PascalCase" => {
            let camel = to_camel_case(name);
            let mut chars = camel.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => camel,
            }
        }
        "UPPERCASE" | "SCREAMING_SNAKE_CASE" => name.to_ascii_uppercase(),
        "kebab-case" => name.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => name.replace('_', "-").to_ascii_uppercase(),
        _ => return None,
    })
}

/// Apply a serde `rename_all` rule to a PascalCase variant name.
fn rename_variant(name: &str, rule: &str) -> Option<String> {
    Some(match rule {
        "PascalCase" => name.to_string(),
        "lowercase" => name.to_ascii_lowercase(),
        "UPPERCASE" => name.to_ascii_uppercase(),
        "camelCase" => {
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        }
        other => rename_field(&to_snake_case(name), other)?,
    })
}

/// Consume the value of a nested meta item we do not interpret.
fn skip_meta_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        meta.input.parse::<syn::Token![=]>()?;
        meta.input.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<TokenStream2>()?;
    }
    Ok(())
}

fn parse_string(meta: &ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    let lit: Lit = meta.input.parse()?;
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

#[derive(Default)]
struct SerdeAttrs {
    rename: Option<String>,
    rename_all: Option<(String, proc_macro2::Span)>,
    skip: bool,
}

/// Read the serde attributes that change a field's or variant's serialized name.
fn parse_serde_attrs(attrs: &[syn::Attribute]) -> syn::Result<SerdeAttrs> {
    let mut serde = SerdeAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(syn::Token![=]) {
                    serde.rename = Some(parse_string(&meta)?);
                } else {
                    skip_meta_value(&meta)?;
                }
            } else if meta.path.is_ident("rename_all") {
                if meta.input.peek(syn::Token![=]) {
                    let span = meta.path.require_ident()?.span();
                    serde.rename_all = Some((parse_string(&meta)?, span));
                } else {
                    skip_meta_value(&meta)?;
                }
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                serde.skip = true;
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }
    Ok(serde)
}

#[derive(Default)]
struct EntityAttrs {
    table: Option<String>,
    ttl: Option<u32>,
}

/// Parse #[entity(table = "...", ttl = N)]
fn parse_entity_attr(input: &DeriveInput) -> syn::Result<EntityAttrs> {
    let mut entity = EntityAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                entity.table = Some(parse_string(&meta)?);
                Ok(())
            } else if meta.path.is_ident("ttl") {
                meta.input.parse::<syn::Token![=]>()?;
                let lit: syn::LitInt = meta.input.parse()?;
                entity.ttl = Some(lit.base10_parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `table` or `ttl`"))
            }
        })?;
    }
    Ok(entity)
}

#[derive(Default)]
struct ColumnAttrs {
    name: Option<String>,
    partition_key: bool,
    clustering_key: bool,
    descending: bool,
    index: Option<String>,
    static_column: bool,
    version: bool,
    skip: bool,
    enum_ordinal: bool,
    enum_name: bool,
    counter: bool,
    timeuuid: bool,
    frozen: bool,
    auto: bool,
    cql_type: Option<String>,
}

/// Parse every #[column(...)] attribute on a field
fn parse_column_attrs(field: &syn::Field) -> syn::Result<ColumnAttrs> {
    let mut column = ColumnAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("column") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let Some(key) = meta.path.get_ident().map(|i| i.to_string()) else {
                return Err(meta.error("unsupported column attribute"));
            };
            match key.as_str() {
                "name" => column.name = Some(parse_string(&meta)?),
                "index" => column.index = Some(parse_string(&meta)?),
                "cql_type" => column.cql_type = Some(parse_string(&meta)?),
                "order" => match parse_string(&meta)?.to_ascii_lowercase().as_str() {
                    "asc" => column.descending = false,
                    "desc" => column.descending = true,
                    _ => return Err(meta.error("order must be \"asc\" or \"desc\"")),
                },
                "partition_key" => column.partition_key = true,
                "clustering_key" => column.clustering_key = true,
                "static_column" => column.static_column = true,
                "version" => column.version = true,
                "skip" => column.skip = true,
                "enum_ordinal" => column.enum_ordinal = true,
                "enum_name" => column.enum_name = true,
                "counter" => column.counter = true,
                "timeuuid" => column.timeuuid = true,
                "frozen" => column.frozen = true,
                "auto" => column.auto = true,
                _ => return Err(meta.error(format!("unknown column attribute `{}`", key))),
            }
            Ok(())
        })?;
    }

    if column.partition_key && column.clustering_key {
        return Err(syn::Error::new_spanned(
            field,
            "a column cannot be both partition_key and clustering_key",
        ));
    }
    if column.enum_ordinal && column.enum_name {
        return Err(syn::Error::new_spanned(
            field,
            "choose one of enum_ordinal and enum_name",
        ));
    }
    Ok(column)
}

/// Last path segment of a type with its angle-bracketed type arguments.
fn type_segment(ty: &Type) -> Option<(String, Vec<&Type>)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let args = match &segment.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Some((segment.ident.to_string(), args))
}

/// `T` for `Option<T>`.
fn option_inner(ty: &Type) -> Option<&Type> {
    match type_segment(ty) {
        Some((name, args)) if name == "Option" && args.len() == 1 => Some(args[0]),
        _ => None,
    }
}

/// Map a Rust type to a `cql_mapping::DataType` expression
fn rust_type_to_cql_type(ty: &Type) -> syn::Result<TokenStream2> {
    let unsupported = || {
        syn::Error::new_spanned(
            ty,
            "cannot infer a column type; add #[column(cql_type = \"...\")], \
             #[column(enum_ordinal)] or #[column(enum_name)]",
        )
    };
    let (name, args) = type_segment(ty).ok_or_else(unsupported)?;

    let data_type = match (name.as_str(), args.as_slice()) {
        ("String" | "str", []) => quote!(cql_mapping::DataType::Text),
        ("i8", []) => quote!(cql_mapping::DataType::TinyInt),
        ("i16" | "u8", []) => quote!(cql_mapping::DataType::SmallInt),
        ("i32" | "u16", []) => quote!(cql_mapping::DataType::Int),
        ("i64" | "u32" | "u64", []) => quote!(cql_mapping::DataType::BigInt),
        ("f32", []) => quote!(cql_mapping::DataType::Float),
        ("f64", []) => quote!(cql_mapping::DataType::Double),
        ("bool", []) => quote!(cql_mapping::DataType::Boolean),
        ("Uuid", []) => quote!(cql_mapping::DataType::Uuid),
        ("Timestamp" | "DateTime", _) => quote!(cql_mapping::DataType::Timestamp),
        ("Vec", [element]) if matches!(type_segment(element), Some((n, _)) if n == "u8") => {
            quote!(cql_mapping::DataType::Blob)
        }
        ("Vec" | "VecDeque", [element]) => {
            let element = rust_type_to_cql_type(element)?;
            quote!(cql_mapping::DataType::list(#element))
        }
        ("HashSet" | "BTreeSet", [element]) => {
            let element = rust_type_to_cql_type(element)?;
            quote!(cql_mapping::DataType::set(#element))
        }
        ("HashMap" | "BTreeMap", [key, value]) => {
            let key = rust_type_to_cql_type(key)?;
            let value = rust_type_to_cql_type(value)?;
            quote!(cql_mapping::DataType::map(#key, #value))
        }
        _ => return Err(unsupported()),
    };
    Ok(data_type)
}

/// Derive macro for the Entity trait
///
/// Generates `Entity::descriptor()` from the struct's fields. Column types are
/// inferred from field types; `Option<T>` fields are nullable. Serde renames
/// (`rename_all` on the struct, `rename` on fields) are honored so rows map
/// back onto the same serialized keys.
///
/// ## Struct attribute
///
/// - `#[entity(table = "...")]` - table name, defaults to the snake_case struct name
/// - `#[entity(ttl = N)]` - default time-to-live in seconds for writes
///
/// ## Field attributes
///
/// - `#[column(partition_key)]`, `#[column(clustering_key, order = "desc")]`
/// - `#[column(name = "...")]` - column name, defaults to the field name
/// - `#[column(index = "...")]` - secondary index; `index = ""` removes a live index
/// - `#[column(static_column)]`, `#[column(version)]`, `#[column(counter)]`
/// - `#[column(timeuuid)]`, `#[column(auto)]` - time-based or generated UUID keys
/// - `#[column(frozen)]`, `#[column(cql_type = "...")]`
/// - `#[column(enum_ordinal)]`, `#[column(enum_name)]` - enums deriving `CqlEnum`
/// - `#[column(skip)]` - not mapped
///
/// ## Example
///
/// ```text
/// #[derive(Entity, Serialize, Deserialize)]
/// #[entity(table = "expenses", ttl = 86400)]
/// #[serde(rename_all = "camelCase")]
/// pub struct Expense {
///     #[column(partition_key)]
///     pub user_id: String,
///     #[column(clustering_key, order = "desc")]
///     pub expense_id: i32,
///     #[column(index = "expense_tags_idx")]
///     pub tags: HashSet<String>,
///     #[column(enum_name)]
///     pub category: Category,
///     #[column(version)]
///     pub version: i64,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Entity can only be derived for structs",
            ));
        }
    };

    let entity = parse_entity_attr(input)?;
    let table = entity
        .table
        .unwrap_or_else(|| to_snake_case(&name.to_string()));
    let rename_all = parse_serde_attrs(&input.attrs)?.rename_all;
    let entity_name = name.to_string();

    let mut field_exprs = Vec::new();
    for field in fields {
        let column = parse_column_attrs(field)?;
        let serde = parse_serde_attrs(&field.attrs)?;
        if column.skip || serde.skip {
            continue;
        }

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = ident.to_string().trim_start_matches("r#").to_string();
        let json_key = match (&serde.rename, &rename_all) {
            (Some(rename), _) => rename.clone(),
            (None, Some((rule, span))) => rename_field(&field_name, rule).ok_or_else(|| {
                syn::Error::new(*span, format!("unsupported rename_all rule `{}`", rule))
            })?,
            (None, None) => field_name.clone(),
        };
        let column_name = column.name.clone().unwrap_or_else(|| field_name.clone());

        let nullable = option_inner(&field.ty).is_some();
        let value_ty = option_inner(&field.ty).unwrap_or(&field.ty);

        let data_type = if column.counter {
            quote!(cql_mapping::DataType::Counter)
        } else if column.timeuuid {
            quote!(cql_mapping::DataType::Timeuuid)
        } else if column.cql_type.is_some() || column.enum_ordinal || column.enum_name {
            quote!(cql_mapping::DataType::Text)
        } else {
            rust_type_to_cql_type(value_ty)?
        };

        let mut modifiers = vec![quote!(.column(#column_name)), quote!(.json_key(#json_key))];
        if let Some(cql_type) = &column.cql_type {
            modifiers.push(quote!(.cql_type(#cql_type)));
        }
        if column.partition_key {
            modifiers.push(quote!(.partition_key()));
        }
        if column.clustering_key {
            let order = if column.descending {
                quote!(cql_mapping::ClusteringOrder::Desc)
            } else {
                quote!(cql_mapping::ClusteringOrder::Asc)
            };
            modifiers.push(quote!(.clustering_key(#order)));
        }
        if let Some(index) = &column.index {
            modifiers.push(quote!(.index(#index)));
        }
        if column.static_column {
            modifiers.push(quote!(.static_column()));
        }
        if column.version {
            modifiers.push(quote!(.version()));
        }
        if nullable {
            modifiers.push(quote!(.nullable()));
        }
        if column.auto {
            modifiers.push(quote!(.auto_generate()));
        }
        if column.frozen {
            modifiers.push(quote!(.frozen()));
        }
        if column.enum_ordinal {
            modifiers.push(
                quote!(.enum_ordinal(<#value_ty as cql_mapping::CqlEnum>::variants())),
            );
        }
        if column.enum_name {
            modifiers.push(quote!(.enum_name(<#value_ty as cql_mapping::CqlEnum>::variants())));
        }

        field_exprs.push(quote! {
            .field(cql_mapping::FieldDescriptor::new(#field_name, #data_type) #(#modifiers)*)
        });
    }

    let ttl = entity.ttl.map(|ttl| quote!(.default_ttl(#ttl)));
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics cql_mapping::Entity for #name #ty_generics #where_clause {
            fn descriptor() -> cql_mapping::EntityDescriptor {
                cql_mapping::EntityDescriptor::new(#entity_name, #table)
                    #ttl
                    #(#field_exprs)*
            }
        }
    })
}

/// Derive macro for the CqlEnum trait
///
/// Exposes the serialized name of every unit variant, in declaration order.
/// Variant positions are the stored ordinals, so append new variants at the end.
/// Serde `rename` on variants and `rename_all` on the enum are honored.
///
/// ## Example
///
/// ```text
/// #[derive(CqlEnum, Serialize, Deserialize)]
/// #[serde(rename_all = "lowercase")]
/// pub enum Category {
///     Food,
///     Travel,
/// }
/// ```
#[proc_macro_derive(CqlEnum)]
pub fn derive_cql_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_cql_enum(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_cql_enum(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "CqlEnum can only be derived for enums",
        ));
    };
    let rename_all = parse_serde_attrs(&input.attrs)?.rename_all;

    let mut idents = Vec::new();
    let mut names = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "CqlEnum variants cannot carry data",
            ));
        }
        let serde = parse_serde_attrs(&variant.attrs)?;
        let variant_name = variant.ident.to_string();
        let stored = match (serde.rename, &rename_all) {
            (Some(rename), _) => rename,
            (None, Some((rule, span))) => rename_variant(&variant_name, rule).ok_or_else(|| {
                syn::Error::new(*span, format!("unsupported rename_all rule `{}`", rule))
            })?,
            (None, None) => variant_name,
        };
        idents.push(&variant.ident);
        names.push(stored);
    }

    if idents.is_empty() {
        return Err(syn::Error::new_spanned(
            input,
            "CqlEnum needs at least one variant",
        ));
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics cql_mapping::CqlEnum for #name #ty_generics #where_clause {
            fn variants() -> &'static [&'static str] {
                &[#(#names),*]
            }

            fn name(&self) -> &'static str {
                match self {
                    #(Self::#idents => #names,)*
                }
            }
        }
    })
}

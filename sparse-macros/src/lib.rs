// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{
    Attribute, Data, DeriveInput, Field, Fields, GenericArgument, Ident, LitStr, PathArguments,
    Type, ext::IdentExt, meta::ParseNestedMeta, parse_macro_input,
};

/// Derives `hashpatch::SparseUpdate` for a struct whose fields are all `Option<_>`.
///
/// A field declared with any other type is rejected at compile time. Adding
/// `#[sparse(normal = Type)]` also derives `hashpatch::Projection`, which
/// copies set fields onto `Type` and wraps a `Type` back into the sparse form.
///
/// Patch member names follow serde: field and container `rename`, container
/// `rename_all`, and `skip`/`skip_serializing` are honoured. `flatten`, `with`,
/// `serialize_with` and `transparent` are rejected.
#[proc_macro_derive(SparseUpdate, attributes(sparse, serde))]
pub fn derive_sparse_update(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct SparseField {
    ident: Ident,
    /// Member name in the stored JSON document
    name: String,
    /// `#[serde(skip)]`-style fields are projected but never patched
    skip_patch: bool,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let normal = normal_type(&input.attrs)?;
    let rule = serde_container_attrs(&input.attrs)?;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "SparseUpdate can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "SparseUpdate can only be derived for structs",
            ));
        }
    };

    let mut fields = Vec::with_capacity(named.len());
    let mut error: Option<syn::Error> = None;

    for field in named {
        match sparse_field(field, rule) {
            Ok(f) => fields.push(f),
            Err(e) => match error.as_mut() {
                Some(existing) => existing.combine(e),
                None => error = Some(e),
            },
        }
    }

    if let Some(error) = error {
        return Err(error);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let patched: Vec<_> = fields.iter().filter(|f| !f.skip_patch).collect();
    let patch_idents = patched.iter().map(|f| &f.ident);
    let patch_names = patched.iter().map(|f| &f.name);
    let all_idents: Vec<_> = fields.iter().map(|f| &f.ident).collect();

    let sparse_impl = quote! {
        impl #impl_generics ::hashpatch::SparseUpdate for #ident #ty_generics #where_clause {
            fn to_patch(&self) -> ::hashpatch::Result<::hashpatch::Patch> {
                let mut patch = ::hashpatch::Patch::new();
                #(
                    if let ::core::option::Option::Some(value) = &self.#patch_idents {
                        patch.insert_value(#patch_names, value)?;
                    }
                )*
                ::core::result::Result::Ok(patch)
            }
        }
    };

    let projection_impl = match normal {
        Some(normal) => quote! {
            impl #impl_generics ::hashpatch::Projection for #ident #ty_generics #where_clause {
                type Normal = #normal;

                fn project_into(&self, normal: &mut Self::Normal) {
                    #(
                        if let ::core::option::Option::Some(value) = &self.#all_idents {
                            normal.#all_idents = ::core::clone::Clone::clone(value);
                        }
                    )*
                }

                fn from_normal(normal: Self::Normal) -> Self {
                    Self {
                        #( #all_idents: ::core::option::Option::Some(normal.#all_idents), )*
                    }
                }
            }
        },
        None => TokenStream2::new(),
    };

    Ok(quote! {
        #sparse_impl
        #projection_impl
    })
}

fn sparse_field(field: &Field, rule: Option<RenameRule>) -> syn::Result<SparseField> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;

    if option_inner(&field.ty).is_none() {
        return Err(syn::Error::new_spanned(
            &field.ty,
            format!(
                "sparse field `{}` must be declared as Option<_>, found `{}`",
                ident.unraw(),
                field.ty.to_token_stream()
            ),
        ));
    }

    let (rename, skip_patch) = serde_field_attrs(&field.attrs)?;
    let name = rename.unwrap_or_else(|| {
        let name = ident.unraw().to_string();
        match rule {
            Some(rule) => rule.apply(&name),
            None => name,
        }
    });

    Ok(SparseField {
        ident,
        name,
        skip_patch,
    })
}

/// Returns `T` for a field typed `Option<T>` (also `std::option::Option<T>`)
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    if type_path.qself.is_some() {
        return None;
    }

    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }

    match &segment.arguments {
        PathArguments::AngleBracketed(args) if args.args.len() == 1 => match args.args.first()? {
            GenericArgument::Type(inner) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

fn normal_type(attrs: &[Attribute]) -> syn::Result<Option<Type>> {
    let mut normal = None;

    for attr in attrs {
        if !attr.path().is_ident("sparse") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("normal") {
                normal = Some(meta.value()?.parse::<Type>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported sparse attribute, expected `normal = Type`"))
            }
        })?;
    }

    Ok(normal)
}

/// Serde's `rename_all` rules as they apply to snake_case field names.
#[derive(Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> syn::Result<Self> {
        Ok(match lit.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            other => {
                return Err(syn::Error::new_spanned(
                    lit,
                    format!("unknown rename rule `rename_all = {:?}`", other),
                ));
            }
        })
    }

    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper | Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Pascal => {
                let mut pascal = String::with_capacity(field.len());
                let mut capitalize = true;
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        pascal.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        pascal.push(ch);
                    }
                }
                pascal
            }
            Self::Camel => {
                let pascal = Self::Pascal.apply(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
        }
    }
}

/// Reads the container-level `#[serde(...)]` options that decide member
/// names. `transparent` has no member names at all and is rejected.
fn serde_container_attrs(attrs: &[Attribute]) -> syn::Result<Option<RenameRule>> {
    let mut rule = None;

    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|nested| {
                        let lit: LitStr = nested.value()?.parse()?;
                        if nested.path.is_ident("serialize") {
                            rule = Some(RenameRule::parse(&lit)?);
                        }
                        Ok(())
                    })
                } else {
                    let lit: LitStr = meta.value()?.parse()?;
                    rule = Some(RenameRule::parse(&lit)?);
                    Ok(())
                }
            } else if meta.path.is_ident("transparent") {
                Err(meta.error("SparseUpdate cannot be derived for a `serde(transparent)` struct"))
            } else {
                skip_meta_value(&meta)
            }
        })?;
    }

    Ok(rule)
}

/// Picks the serialized member name and `skip`/`skip_serializing` out of the
/// field's `#[serde(...)]` options. Options that would make the stored member
/// differ from what the patch writes are compile errors.
fn serde_field_attrs(attrs: &[Attribute]) -> syn::Result<(Option<String>, bool)> {
    let mut rename = None;
    let mut skip = false;

    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|nested| {
                        let lit: LitStr = nested.value()?.parse()?;
                        if nested.path.is_ident("serialize") {
                            rename = Some(lit.value());
                        }
                        Ok(())
                    })?;
                } else {
                    let lit: LitStr = meta.value()?.parse()?;
                    rename = Some(lit.value());
                }
                Ok(())
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                skip = true;
                Ok(())
            } else if meta.path.is_ident("flatten")
                || meta.path.is_ident("with")
                || meta.path.is_ident("serialize_with")
            {
                Err(meta.error(format!(
                    "`serde({})` is not supported on a sparse field",
                    meta.path.to_token_stream()
                )))
            } else {
                skip_meta_value(&meta)
            }
        })?;
    }

    Ok((rename, skip))
}

/// Consumes `= value` or `(...)` after a serde option that does not affect
/// member names.
fn skip_meta_value(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|nested| skip_meta_value(&nested))?;
    }
    Ok(())
}

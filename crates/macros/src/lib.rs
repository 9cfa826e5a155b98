//! Proc-macro for Trebuchet actors.
//!
//! ## `#[derive(Actor)]`
//!
//! Scans a struct's fields for `#[streamed]` and generates, for each such
//! field `name: StreamedProperty<T>`, the accessor triple a remote proxy
//! expects to find on an actor:
//!
//! ```ignore
//! use trebuchet_actor::StreamedProperty;
//! use trebuchet_macros::Actor;
//!
//! #[derive(Actor)]
//! pub struct Counter {
//!     #[streamed]
//!     count: StreamedProperty<i64>,
//!     label: String,
//! }
//! ```
//!
//! expands to an `impl Counter` block containing:
//!
//! ```ignore
//! impl Counter {
//!     pub fn count(&self) -> i64 { self.count.get() }
//!     pub async fn set_count(&self, value: i64) { self.count.set(value).await }
//!     pub fn observe_count(&self) -> trebuchet_actor::ObserveStream<i64> {
//!         self.count.observe()
//!     }
//! }
//! ```
//!
//! The generated `observe_count()` mirrors the conventional
//! `observeCount()` accessor: a lazy, non-restartable sequence that
//! yields the current value immediately and then every subsequent
//! write, each independent per call.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derive macro entry point. See the module docs for the expansion shape.
#[proc_macro_derive(Actor, attributes(streamed))]
pub fn derive_actor(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "#[derive(Actor)] requires named fields",
                )
                .to_compile_error()
                .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "#[derive(Actor)] only applies to structs")
                .to_compile_error()
                .into()
        }
    };

    let mut accessors = Vec::new();
    for field in fields {
        let is_streamed = field.attrs.iter().any(|attr| attr.path().is_ident("streamed"));
        if !is_streamed {
            continue;
        }
        let field_name = field.ident.as_ref().expect("named field");
        let field_ty = &field.ty;
        let inner_ty = streamed_property_inner_type(field_ty).unwrap_or_else(|| {
            panic!(
                "#[streamed] field `{}` on `{}` must be declared as StreamedProperty<T>",
                field_name, struct_name
            )
        });
        let setter = format_ident!("set_{}", field_name);
        let observer = format_ident!("observe_{}", field_name);

        accessors.push(quote! {
            /// Current value of the streamed property; reads never block
            /// on or queue behind subscribers.
            pub fn #field_name(&self) -> #inner_ty {
                self.#field_name.get()
            }

            /// Write the streamed property and fan the new value out to
            /// every current subscriber, ordered with this write.
            pub async fn #setter(&self, value: #inner_ty) {
                self.#field_name.set(value).await
            }

            /// An independent, non-restartable sequence of this property's
            /// values, starting with the current value at subscribe time.
            pub fn #observer(&self) -> trebuchet_actor::ObserveStream<#inner_ty> {
                self.#field_name.observe()
            }
        });
    }

    let expanded = quote! {
        impl #struct_name {
            #(#accessors)*
        }
    };
    expanded.into()
}

/// Extract `T` from a field type written as `StreamedProperty<T>`.
fn streamed_property_inner_type(ty: &syn::Type) -> Option<syn::Type> {
    let syn::Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "StreamedProperty" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(t) => Some(t.clone()),
        _ => None,
    })
}

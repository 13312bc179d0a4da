//! Derive macro for service-registry
//!
//! `#[derive(Service)]` implements `service_registry::Service` for a struct
//! whose `#[dep]` fields are its dependencies.
//!
//! ```rust,ignore
//! use service_registry::{All, Service, ServiceRegistry};
//! use std::sync::Arc;
//!
//! trait Plugin: Send + Sync {}
//!
//! struct Config;
//!
//! #[derive(Service)]
//! struct Host {
//!     #[dep]
//!     config: Arc<Config>,
//!     #[dep]
//!     plugins: All<dyn Plugin>,
//!     // Non-dep fields use Default
//!     started: u64,
//! }
//!
//! let registry = ServiceRegistry::named("host");
//! registry.add(Config).unwrap();
//! registry.add_type::<Host>().unwrap();
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields};

/// Largest tuple of dependencies the registry accepts
const MAX_DEPENDENCIES: usize = 8;

/// Derive `Service` from `#[dep]`-annotated fields.
///
/// Each `#[dep]` field must implement `service_registry::Dependency`:
/// `Arc<T>`, `All<T>`, `Producer<T>` or `ServiceRegistry`. Dependencies are
/// requested in field order. Other fields are initialized with
/// `Default::default()`.
///
/// ```rust,ignore
/// #[derive(Service)]
/// struct UserService {
///     #[dep]
///     db: Arc<Database>,
///     #[dep]
///     sessions: Producer<Session>,
///     hits: AtomicU64,
/// }
///
/// // Generated:
/// // impl Service for UserService {
/// //     type Dependencies = (Arc<Database>, Producer<Session>);
/// //     fn create((db, sessions): Self::Dependencies) -> Result<Self, BoxError> {
/// //         Ok(Self { db, sessions, hits: Default::default() })
/// //     }
/// // }
/// ```
#[proc_macro_derive(Service, attributes(dep))]
pub fn derive_service(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_service(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_service(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => {
                return Ok(quote! {
                    impl #impl_generics ::service_registry::Service for #name #ty_generics #where_clause {
                        type Dependencies = ();

                        fn create(_: ()) -> ::std::result::Result<Self, ::service_registry::BoxError> {
                            ::std::result::Result::Ok(Self)
                        }
                    }
                });
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Service can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Service can only be derived for structs",
            ));
        }
    };

    let mut dep_types = Vec::new();
    let mut dep_names = Vec::new();
    let mut field_inits = Vec::new();

    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };

        if is_dep(&field.attrs)? {
            let binding = format_ident!("__dep_{}", dep_names.len());
            dep_types.push(&field.ty);
            field_inits.push(quote! { #field_name: #binding });
            dep_names.push(binding);
        } else {
            field_inits.push(quote! { #field_name: ::std::default::Default::default() });
        }
    }

    if dep_types.len() > MAX_DEPENDENCIES {
        return Err(syn::Error::new_spanned(
            input,
            format!("Service supports at most {MAX_DEPENDENCIES} #[dep] fields"),
        ));
    }

    let (deps_type, deps_pattern) = match dep_types.as_slice() {
        [] => (quote! { () }, quote! { _ }),
        [single] => {
            let binding = &dep_names[0];
            (quote! { #single }, quote! { #binding })
        }
        types => (quote! { (#(#types,)*) }, quote! { (#(#dep_names,)*) }),
    };

    Ok(quote! {
        impl #impl_generics ::service_registry::Service for #name #ty_generics #where_clause {
            type Dependencies = #deps_type;

            fn create(#deps_pattern: Self::Dependencies) -> ::std::result::Result<Self, ::service_registry::BoxError> {
                ::std::result::Result::Ok(Self {
                    #(#field_inits),*
                })
            }
        }
    })
}

/// `#[dep]` takes no arguments
fn is_dep(attrs: &[Attribute]) -> syn::Result<bool> {
    for attr in attrs {
        if attr.path().is_ident("dep") {
            attr.meta.require_path_only()?;
            return Ok(true);
        }
    }
    Ok(false)
}

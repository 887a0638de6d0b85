//! `#[dispatchable]` macro implementation.

use inflector::Inflector as _;
use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{spanned::Spanned as _, Error, Fields, Ident, ItemEnum, Result};

/// Name of the handler method of the provided variant: `on_` followed by the
/// `snake_case`d variant name.
fn handler_name(variant: &str) -> String {
    format!("on_{}", variant.to_snake_case())
}

/// Single `enum` variant along with the shape of its payload.
struct Variant<'a> {
    ident: &'a Ident,
    handler: Ident,
    fields: &'a Fields,
}

impl<'a> Variant<'a> {
    /// Validates the provided [`syn::Variant`].
    ///
    /// Tuple variants may carry a single field only, which is passed to the
    /// handler as is.
    fn parse(v: &'a syn::Variant) -> Result<Self> {
        if let Fields::Unnamed(f) = &v.fields {
            if f.unnamed.len() != 1 {
                return Err(Error::new(
                    f.span(),
                    "#[dispatchable] tuple variants must have exactly one \
                     field",
                ));
            }
        }
        Ok(Self {
            ident: &v.ident,
            handler: Ident::new(
                &handler_name(&v.ident.to_string()),
                Span::call_site(),
            ),
            fields: &v.fields,
        })
    }

    /// `match` arm moving the payload into the handler method.
    fn dispatch_arm(&self, enum_ident: &Ident) -> TokenStream2 {
        let (ident, handler) = (self.ident, &self.handler);
        match self.fields {
            Fields::Named(f) => {
                let names: Vec<_> = f.named.iter().map(|f| &f.ident).collect();
                quote! {
                    #enum_ident::#ident { #(#names),* } => {
                        handler.#handler(#(#names),*)
                    }
                }
            }
            Fields::Unnamed(_) => quote! {
                #enum_ident::#ident(data) => handler.#handler(data),
            },
            Fields::Unit => quote! {
                #enum_ident::#ident => handler.#handler(),
            },
        }
    }

    /// Declaration of the handler method in the generated trait.
    fn handler_decl(&self, enum_name: &str) -> TokenStream2 {
        let args = match self.fields {
            Fields::Named(f) => {
                let args = f.named.iter().map(|f| {
                    let (ident, ty) = (&f.ident, &f.ty);
                    quote! { #ident: #ty }
                });
                quote! { #(#args),* }
            }
            Fields::Unnamed(f) => {
                let ty = f.unnamed.iter().map(|f| &f.ty);
                quote! { data: #(#ty)* }
            }
            Fields::Unit => quote! {},
        };
        let doc = format!("Handles [`{}::{}`].", enum_name, self.ident);
        let handler = &self.handler;
        quote! {
            #[doc = #doc]
            fn #handler(&mut self, #args);
        }
    }
}

/// Appends a `{Enum}Handler` trait with a method per variant of the provided
/// `enum`, and an `{Enum}::dispatch_with()` routing a value to the method of
/// its variant.
pub fn derive(input: TokenStream) -> Result<TokenStream> {
    let mut output = input.clone();

    let item: ItemEnum = syn::parse(input)?;
    let enum_ident = &item.ident;
    let enum_name = enum_ident.to_string();
    let vis = &item.vis;
    let variants = item
        .variants
        .iter()
        .map(Variant::parse)
        .collect::<Result<Vec<_>>>()?;

    let arms = variants.iter().map(|v| v.dispatch_arm(enum_ident));
    let decls = variants.iter().map(|v| v.handler_decl(&enum_name));
    let trait_ident = format_ident!("{}Handler", enum_ident);
    let trait_doc = format!(
        "Handler of the [`{0}`]s, see [`{0}::dispatch_with`].",
        enum_name,
    );
    let method_doc = format!(
        "Passes this [`{0}`] to the method of the provided \
         [`{0}Handler`] matching its variant.",
        enum_name,
    );

    output.extend(TokenStream::from(quote! {
        #[automatically_derived]
        #[doc = #trait_doc]
        #vis trait #trait_ident {
            #(#decls)*
        }

        #[automatically_derived]
        impl #enum_ident {
            #[doc = #method_doc]
            #vis fn dispatch_with<H: #trait_ident>(self, handler: &mut H) {
                match self {
                    #(#arms)*
                }
            }
        }
    }));
    Ok(output)
}

#[cfg(test)]
mod spec {
    use super::handler_name;

    #[test]
    fn prefixes_snake_cased_variant() {
        for (variant, expected) in &[
            ("JoinResponse", "on_join_response"),
            ("IceTrickle", "on_ice_trickle"),
            ("SFUError", "on_sfu_error"),
            ("HealthCheckResponse", "on_health_check_response"),
            ("GoAway", "on_go_away"),
        ] {
            assert_eq!(handler_name(variant), *expected);
        }
    }
}

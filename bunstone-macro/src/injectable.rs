use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_injectable_impl(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn generate_injectable_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let injections = fields.named.iter().map(|field| {
                    let field_name = &field.ident;
                    let value = field_value(&field.ty);
                    quote! { #field_name: #value }
                });
                quote! { Self { #(#injections),* } }
            }
            Fields::Unit => quote! { Self },
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    struct_name,
                    "#[derive(Injectable)] only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "#[derive(Injectable)] can only be applied to structs",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::bunstone::Injectable for #struct_name #ty_generics #where_clause {
            fn inject(
                resolver: &::bunstone::di::Resolver<'_>
            ) -> ::bunstone::Result<Self> {
                Ok(#body)
            }
        }
    })
}

fn field_value(ty: &Type) -> TokenStream2 {
    match arc_inner(ty) {
        // syn parses `dyn Trait` as a trait object
        Some(inner) if matches!(inner, Type::TraitObject(_)) => quote!(resolver.resolve_trait::<#inner>()?),
        Some(inner) => quote!(resolver.resolve::<#inner>()?),
        None => quote!(::core::default::Default::default()),
    }
}

/// Extract the inner type from Arc<T> or Arc<dyn Trait>
fn arc_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Arc" {
        return None;
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => match args.args.first()? {
            syn::GenericArgument::Type(inner) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

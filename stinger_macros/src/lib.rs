use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, parse_macro_input};

extern crate proc_macro;

/// Marks a struct as a data record that can flow through generators and be
/// persisted to replay files.
///
/// Derives the serde traits plus `Debug`, `Clone` and `PartialEq`, and
/// implements `stinger::Record` for the type.
#[proc_macro_attribute]
pub fn record(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let ident = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl #impl_generics stinger::Record for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

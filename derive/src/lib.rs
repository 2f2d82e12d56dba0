use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Data, DataEnum, DataStruct, DeriveInput, Fields, GenericParam,
    Generics,
};

/// Derives `cellar::Trace` by tracing every field in declaration order.
///
/// The generated impl is total: there is no way to opt a field out, which
/// is what makes a derived impl safe to mark `unsafe impl`. Hand-written
/// impls that skip an edge cause cells to be swept while still reachable.
#[proc_macro_derive(Trace)]
pub fn trace(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let generics = add_trace_bound(input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let trace_body = match input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(ref fields),
            ..
        }) => fields
            .named
            .iter()
            .map(|field| {
                let field_name = &field.ident;

                quote! {
                    cellar::Trace::trace(&self.#field_name, tracer);
                }
            })
            .collect::<Vec<_>>(),
        Data::Struct(DataStruct {
            fields: Fields::Unnamed(ref fields),
            ..
        }) => fields
            .unnamed
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let idx = syn::Index::from(i);
                quote! {
                    cellar::Trace::trace(&self.#idx, tracer);
                }
            })
            .collect::<Vec<_>>(),
        Data::Struct(DataStruct {
            fields: Fields::Unit,
            ..
        }) => vec![quote! {}],
        Data::Enum(DataEnum { variants, .. }) => {
            let arms = variants.iter().map(|variant| {
                let variant_ident = &variant.ident;

                match &variant.fields {
                    Fields::Unnamed(fields) => {
                        let body = fields.unnamed.iter().enumerate().map(|(idx, _)| {
                            let ident = Ident::new(&format!("t{}", idx), Span::mixed_site());
                            quote! {
                                cellar::Trace::trace( #ident , tracer);
                            }
                        });

                        let args = fields.unnamed.iter().enumerate().map(|(idx, _)| {
                            let ident = Ident::new(&format!("t{}", idx), Span::mixed_site());

                            quote! { #ident, }
                        });

                        quote! {
                            #name::#variant_ident(#(#args)*) => { #(#body)* }
                        }
                    }
                    Fields::Named(fields) => {
                        let body = fields.named.iter().map(|field| {
                            let ident = field.ident.clone().unwrap();

                            quote! {
                                cellar::Trace::trace( #ident , tracer);
                            }
                        });

                        let args = fields.named.iter().map(|field| {
                            let ident = field.ident.clone().unwrap();

                            quote! { #ident, }
                        });

                        quote! {
                            #name::#variant_ident{#(#args)*} => { #(#body)* }
                        }
                    }
                    Fields::Unit => {
                        quote! {
                            #name::#variant_ident => {}
                        }
                    }
                }
            });

            if variants.is_empty() {
                vec![quote! {}]
            } else {
                vec![quote! {
                    match self { #(#arms)* }
                }]
            }
        }
        _ => unimplemented!("#[derive(Trace)] is not implemented for this type"),
    };

    let expanded = quote! {
        #[automatically_derived]
        unsafe impl #impl_generics cellar::Trace for #name #ty_generics #where_clause {
            fn trace(&self, tracer: &mut cellar::Tracer<'_>) {
                #(#trace_body)*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Derives `cellar::TraceLeaf` (and an empty `Trace` impl) for types that
/// hold no heap references. Every field type must itself be a leaf; the
/// generated assertion fails to compile otherwise.
#[proc_macro_derive(TraceLeaf)]
pub fn trace_leaf(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let generics = add_leaf_bound(input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_types: Vec<_> = match input.data {
        Data::Struct(DataStruct { ref fields, .. }) => {
            fields.iter().map(|field| field.ty.clone()).collect()
        }
        Data::Enum(DataEnum { ref variants, .. }) => variants
            .iter()
            .flat_map(|variant| variant.fields.iter().map(|field| field.ty.clone()))
            .collect(),
        _ => unimplemented!("#[derive(TraceLeaf)] is not implemented for this type"),
    };

    let assertions = field_types.iter().map(|ty| {
        quote! {
            <#ty as cellar::TraceLeaf>::__assert_trace_leaf();
        }
    });

    let expanded = quote! {
        #[automatically_derived]
        unsafe impl #impl_generics cellar::TraceLeaf for #name #ty_generics #where_clause {
            fn __assert_trace_leaf() {
                #(#assertions)*
            }
        }

        #[automatically_derived]
        unsafe impl #impl_generics cellar::Trace for #name #ty_generics #where_clause {
            fn trace(&self, _tracer: &mut cellar::Tracer<'_>) {}
        }
    };

    TokenStream::from(expanded)
}

fn add_trace_bound(mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            type_param.bounds.push(parse_quote!(cellar::Trace));
        }
    }
    generics
}

fn add_leaf_bound(mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            type_param.bounds.push(parse_quote!(cellar::TraceLeaf));
        }
    }
    generics
}

//! Runmark Macros
//!
//! Procedural macros for workload registration.
//!
//! ## Macros
//!
//! - `#[runmark::workload]` - Register a zero-argument function as a workload

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{ItemFn, ReturnType, parse_macro_input};

mod attr {
    use syn::meta::ParseNestedMeta;

    /// Get the attribute name as a string
    pub fn name(meta: &ParseNestedMeta) -> String {
        meta.path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default()
    }

    /// Parse a string literal attribute: `attr = "value"`
    pub fn string(meta: &ParseNestedMeta) -> syn::Result<String> {
        let value: syn::LitStr = meta.value()?.parse()?;
        Ok(value.value())
    }

    /// Create an unknown attribute error
    pub fn unknown(meta: &ParseNestedMeta, name: &str) -> syn::Error {
        meta.error(format!("unknown attribute: {}", name))
    }
}

/// Register a workload function
///
/// The function must take no arguments. Its return value is passed through
/// `black_box` and dropped; the declared return type is recorded as the
/// `return` annotation.
///
/// # Example
///
/// ```ignore
/// #[runmark::workload]
/// fn train_epoch() -> f64 {
///     model.train(&data)
/// }
///
/// // With a registry name and extra annotations
/// #[runmark::workload(name = "resize_4k", tags = "image, cpu")]
/// fn resize() { ... }
/// ```
#[proc_macro_attribute]
pub fn workload(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = TokenStream2::from(args);
    let func = parse_macro_input!(item as ItemFn);

    workload_impl(args, func)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn workload_impl(args: TokenStream2, func: ItemFn) -> Result<TokenStream2, syn::Error> {
    validate_signature(&func)?;
    let config = parse_workload_config(args)?;

    let fn_name = &func.sig.ident;
    let wrapper_name = format_ident!("_runmark_wrapper_{}", fn_name);
    let name = config.name.unwrap_or_else(|| fn_name.to_string());

    let return_type = match &func.sig.output {
        ReturnType::Default => "()".to_string(),
        ReturnType::Type(_, ty) => type_string(&quote! { #ty }.to_string()),
    };
    let mut annotations = vec![quote! { ("return", #return_type) }];
    if let Some(tags) = &config.tags {
        annotations.push(quote! { ("tags", #tags) });
    }

    Ok(quote! {
        #func

        #[doc(hidden)]
        #[allow(non_snake_case)]
        fn #wrapper_name() {
            let _ = ::std::hint::black_box(#fn_name());
        }

        ::runmark::internal::inventory::submit! {
            ::runmark::WorkloadDef {
                name: #name,
                module_path: module_path!(),
                file: file!(),
                line: line!(),
                annotations: &[#(#annotations),*],
                run: #wrapper_name,
            }
        }
    })
}

#[derive(Default)]
struct WorkloadConfig {
    name: Option<String>,
    tags: Option<String>,
}

fn parse_workload_config(args: TokenStream2) -> Result<WorkloadConfig, syn::Error> {
    let mut config = WorkloadConfig::default();

    if args.is_empty() {
        return Ok(config);
    }

    let parser = syn::meta::parser(|meta| {
        let name = attr::name(&meta);
        match name.as_str() {
            "name" => {
                let value = attr::string(&meta)?;
                if value.trim().is_empty() {
                    return Err(meta.error("runmark: workload name must not be empty"));
                }
                config.name = Some(value);
            }
            "tags" => {
                let tags: Vec<String> = attr::string(&meta)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                config.tags = Some(tags.join(", "));
            }
            _ => return Err(attr::unknown(&meta, &name)),
        }
        Ok(())
    });

    syn::parse::Parser::parse2(parser, args)?;
    Ok(config)
}

fn validate_signature(func: &ItemFn) -> syn::Result<()> {
    if !func.sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.inputs,
            "runmark: workload functions must take no arguments",
        ));
    }
    if func.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            func.sig.asyncness,
            "runmark: async workloads are not supported",
        ));
    }
    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "runmark: workload functions must not be generic",
        ));
    }
    Ok(())
}

/// Collapse the spacing `quote` puts between type tokens: `Vec < u8 >` → `Vec<u8>`.
fn type_string(tokens: &str) -> String {
    let mut out = String::with_capacity(tokens.len());
    let mut chars = tokens.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ' ' {
            out.push(c);
            continue;
        }
        let prev = out.chars().last();
        let next = chars.peek().copied();
        let glue_prev = matches!(prev, Some('<' | '(' | '[' | '&' | ':'));
        let glue_next = matches!(next, Some('<' | '>' | ',' | ')' | ']' | ':' | ';'));
        if !glue_prev && !glue_next {
            out.push(' ');
        }
    }
    out
}

//! Procedural macros for testkit-unit
//!
//! This crate provides the `#[testkit_unit::test]` attribute macro, which
//! turns a function taking a `&TestContext` into a regular `#[test]` run by
//! the testkit-unit engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_unit::prelude::*;
//!
//! #[testkit_unit::test(timeout = 500)]
//! fn replies_in_time(ctx: &TestContext) -> Result<(), Failure> {
//!     let done = ctx.async_handle()?;
//!     std::thread::spawn(move || done.complete().unwrap());
//!     Ok(())
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Ident, ItemFn, Lit, Token,
};

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Per-test timeout in milliseconds, `0` disabling it
    timeout_millis: Option<u64>,
    /// Run the body on a dedicated thread
    thread: bool,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "timeout" => match input.parse::<Lit>()? {
                    Lit::Int(i) => config.timeout_millis = Some(i.base10_parse()?),
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "timeout expects an integer number of milliseconds",
                        ));
                    }
                },
                "thread" => match input.parse::<Lit>()? {
                    Lit::Bool(b) => config.thread = b.value(),
                    other => {
                        return Err(syn::Error::new_spanned(other, "thread expects a boolean"));
                    }
                },
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// Test attribute macro running a function on the testkit-unit engine.
///
/// The function takes the test context and returns `Result<(), Failure>`.
/// It becomes a plain `#[test]` that runs the body to completion, waiting for
/// every completion handle it created, and panics with the failure message
/// if the test failed.
///
/// # Configuration Options
///
/// - `timeout = 500` - Per-test timeout in milliseconds (`0` disables it,
///   the default is two minutes)
/// - `thread = true` - Run the body on a dedicated thread
///
/// ```rust,ignore
/// #[testkit_unit::test(timeout = 100, thread = true)]
/// fn not_on_the_harness_thread(ctx: &TestContext) -> Result<(), Failure> {
///     ctx.assert_some(&std::thread::current().name())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: TestConfig, input: ItemFn) -> syn::Result<TokenStream2> {
    if let Some(asyncness) = &input.sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "test function must not be async; register pending work with ctx.async_handle()",
        ));
    }
    if input.sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &input.sig.inputs,
            "test function must take exactly one `&TestContext` parameter",
        ));
    }

    let name = &input.sig.ident;
    let attrs = &input.attrs;
    let vis = &input.vis;

    // The original function, renamed so it cannot clash with the wrapper.
    let body_name = format_ident!("__testkit_unit_{}", name);
    let mut body_fn = input.clone();
    body_fn.attrs.clear();
    body_fn.vis = syn::Visibility::Inherited;
    body_fn.sig.ident = body_name.clone();

    let options = match config.timeout_millis {
        Some(millis) => quote! {
            ::testkit_unit::options::TestOptions::new().with_timeout_millis(#millis)
        },
        None => quote! { ::testkit_unit::options::TestOptions::new() },
    };

    let run = if config.thread {
        quote! {
            ::testkit_unit::runner::run_test_with_mode(
                #options,
                ::testkit_unit::runtime::DedicatedThread::new(),
                #body_name,
            )
        }
    } else {
        quote! { ::testkit_unit::runner::run_test(#options, #body_name) }
    };

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #name() {
            #body_fn

            let result = #run;
            if let ::core::option::Option::Some(failure) = result.failure() {
                ::core::panic!("{}", failure);
            }
        }
    })
}

//! `#[timeout(..)]` runs a synchronous test body on a helper thread and fails
//! the test if it has not finished in time. Blocking ring reads in tests use
//! it so a lost wakeup shows up as a failure instead of a hung test binary.
//!
//! Accepted forms: `#[timeout]` (60s), `#[timeout(5)]` (seconds),
//! `#[timeout(secs = 5)]` and `#[timeout(ms = 250)]`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

struct TimeoutArgs {
    millis: u64,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(Self {
                millis: DEFAULT_TIMEOUT_MS,
            });
        }

        let millis = if input.peek(LitInt) {
            let lit: LitInt = input.parse()?;
            lit.base10_parse::<u64>()?.saturating_mul(1000)
        } else {
            let unit: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let lit: LitInt = input.parse()?;
            let value = lit.base10_parse::<u64>()?;
            match unit.to_string().as_str() {
                "ms" => value,
                "secs" => value.saturating_mul(1000),
                other => {
                    return Err(syn::Error::new(
                        unit.span(),
                        format!("unknown timeout unit `{other}`, expected `ms` or `secs`"),
                    ))
                }
            }
        };

        if millis == 0 {
            return Err(syn::Error::new(
                Span::call_site(),
                "timeout must be greater than zero",
            ));
        }
        Ok(Self { millis })
    }
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let TimeoutArgs { millis } = parse_macro_input!(attr as TimeoutArgs);

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let name = sig.ident.to_string();

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_millis(#millis);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name(#name.to_string())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block));
                    let _ = sender.send(result);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("{} timed out after {:?}", #name, timeout_duration)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}

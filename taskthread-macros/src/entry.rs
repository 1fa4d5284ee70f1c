use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::parse::Parser;

use crate::parse::{is_test_attribute, lit_str, rebuild, tail_spans, with_error};
use syn::ItemFn;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

/// Used to still expand to something close to the input when the attribute
/// arguments are invalid, so IDE completions keep working.
const DEFAULT_ERROR_CONFIG: FinalConfig = FinalConfig {
    flavor: ThreadFlavor::Auto,
    name: None,
};

/// Expands
///
/// ```ignore
/// #[taskthread::main(flavor = "socket_server", name = "io")]
/// fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// where `args` is `flavor = "socket_server", name = "io"` and `item` is the
/// function the thread is installed around.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, false)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, true)
}

fn expand(args: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(input) => input,
        Err(e) => return with_error(item, e),
    };

    let config = check_signature(&input, is_test).and_then(|()| {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, is_test))
    });

    match config {
        Ok(config) => parse_knobs(input, is_test, config),
        Err(e) => with_error(parse_knobs(input, is_test, DEFAULT_ERROR_CONFIG), e),
    }
}

fn check_signature(input: &ItemFn, is_test: bool) -> syn::Result<()> {
    if is_test {
        if let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr)) {
            let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
            return Err(syn::Error::new_spanned(attr, msg));
        }
    } else if input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        return Err(syn::Error::new_spanned(&input.sig.ident, msg));
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum ThreadFlavor {
    Auto,
    SocketServer,
}

impl ThreadFlavor {
    fn from_str(s: &str) -> Result<ThreadFlavor, String> {
        match s {
            "auto" => Ok(ThreadFlavor::Auto),
            "socket_server" => Ok(ThreadFlavor::SocketServer),
            _ => Err(format!(
                "No such thread flavor `{s}`. The thread flavors are `auto` and `socket_server`."
            )),
        }
    }
}

struct FinalConfig {
    flavor: ThreadFlavor,
    name: Option<String>,
}

struct ConfigBuilder {
    flavor: Option<ThreadFlavor>,
    name: Option<String>,
}

impl ConfigBuilder {
    fn new() -> Self {
        ConfigBuilder {
            flavor: None,
            name: None,
        }
    }

    fn set_flavor(&mut self, lit: &syn::Lit) -> syn::Result<()> {
        if self.flavor.is_some() {
            return Err(syn::Error::new_spanned(lit, "`flavor` set multiple times."));
        }

        let flavor = ThreadFlavor::from_str(&lit_str(lit, "flavor")?)
            .map_err(|err| syn::Error::new_spanned(lit, err))?;
        self.flavor = Some(flavor);

        Ok(())
    }

    fn set_name(&mut self, lit: &syn::Lit) -> syn::Result<()> {
        if self.name.is_some() {
            return Err(syn::Error::new_spanned(lit, "`name` set multiple times."));
        }

        let name = lit_str(lit, "name")?;
        if name.is_empty() {
            return Err(syn::Error::new_spanned(lit, "`name` may not be empty."));
        }
        self.name = Some(name);

        Ok(())
    }

    fn build(self) -> FinalConfig {
        FinalConfig {
            flavor: self.flavor.unwrap_or(ThreadFlavor::Auto),
            name: self.name,
        }
    }
}

fn build_config(
    input: &ItemFn,
    args: AttributeArgs,
    is_test: bool,
) -> Result<FinalConfig, syn::Error> {
    if let Some(asyncness) = input.sig.asyncness {
        let macro_name = if is_test {
            "taskthread::test"
        } else {
            "taskthread::main"
        };
        let msg = format!(
            "`{macro_name}` functions run synchronously on a TaskThread, remove the `async` keyword"
        );
        return Err(syn::Error::new_spanned(asyncness, msg));
    }

    let mut config = ConfigBuilder::new();

    for arg in args {
        match arg {
            syn::Meta::NameValue(namevalue) => {
                let ident = namevalue
                    .path
                    .get_ident()
                    .ok_or_else(|| {
                        syn::Error::new_spanned(&namevalue, "Must have specified ident")
                    })?
                    .to_string()
                    .to_lowercase();
                let lit = match &namevalue.value {
                    syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit,
                    expr => return Err(syn::Error::new_spanned(expr, "Must be a literal")),
                };
                match ident.as_str() {
                    "flavor" => config.set_flavor(lit)?,
                    "name" => config.set_name(lit)?,
                    name => {
                        let msg = format!(
                            "Unknown attribute {name} is specified; expected one of: `flavor`, `name`",
                        );
                        return Err(syn::Error::new_spanned(namevalue, msg));
                    }
                }
            }
            syn::Meta::Path(path) => {
                let name = path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&path, "Must have specified ident"))?
                    .to_string()
                    .to_lowercase();
                let msg = match name.as_str() {
                    "flavor" | "name" => format!("The `{name}` attribute requires an argument."),
                    name => format!(
                        "Unknown attribute {name} is specified; expected one of: `flavor`, `name`."
                    ),
                };
                return Err(syn::Error::new_spanned(path, msg));
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "Unknown attribute inside the macro",
                ));
            }
        }
    }

    Ok(config.build())
}

fn parse_knobs(input: ItemFn, is_test: bool, config: FinalConfig) -> TokenStream {
    let (tail_start, tail_end) = tail_spans(&input);

    let name = config
        .name
        .unwrap_or_else(|| input.sig.ident.to_string());

    let builder = quote_spanned! {tail_start=>
        taskthread::Builder::new().name(#name)
    };

    let thread = match config.flavor {
        ThreadFlavor::Auto => quote_spanned! {tail_start=>
            taskthread::AutoThread::from_builder(#builder)
        },
        ThreadFlavor::SocketServer => quote_spanned! {tail_start=>
            taskthread::AutoSocketServerThread::from_builder(
                #builder.socket_server(::std::sync::Arc::new(taskthread::NullSocketServer::new()))
            )
        },
    };

    let extra_attrs = if is_test {
        quote! { #[::core::prelude::v1::test] }
    } else {
        TokenStream::new()
    };

    let output_type = match &input.sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ret_type) => quote! { #ret_type },
    };

    // The thread is installed before the body runs and torn down after the
    // returned value has been computed. `return` inside the body leaves the
    // closure only.
    let block = &input.block;
    let prologue = quote! {
        let body = || -> #output_type #block;
        let _taskthread = #thread;
    };

    let tail = quote_spanned! {tail_end=>
        #[allow(clippy::needless_return, clippy::redundant_closure_call)]
        {
            return body();
        }
    };

    rebuild(input, extra_attrs, prologue, tail)
}

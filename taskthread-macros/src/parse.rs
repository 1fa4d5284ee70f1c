use proc_macro2::{Span, TokenStream};
use quote::{ToTokens, quote};
use syn::{AttrStyle, Attribute, ItemFn, Lit};

/// Reads a `key = "value"` argument, rejecting anything but a string literal.
pub(crate) fn lit_str(lit: &Lit, key: &str) -> syn::Result<String> {
    let Lit::Str(s) = lit else {
        return Err(syn::Error::new_spanned(
            lit,
            format!("`{key}` expects a string literal, e.g. `{key} = \"...\"`."),
        ));
    };
    Ok(s.value())
}

/// Matches `#[test]`, `#[core::prelude::<edition>::test]` and
/// `#[std::prelude::<edition>::test]`, with or without a leading `::`.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };
    if path.segments.iter().any(|seg| !seg.arguments.is_none()) {
        return false;
    }

    let idents: Vec<String> = path.segments.iter().map(|seg| seg.ident.to_string()).collect();
    match idents.as_slice() {
        [name] => path.leading_colon.is_none() && name == "test",
        [krate, prelude, _edition, name] => {
            (krate == "core" || krate == "std") && prelude == "prelude" && name == "test"
        }
        _ => false,
    }
}

/// Appends `error` to `tokens` so the item still expands alongside the
/// diagnostic.
pub(crate) fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}

/// First and last token spans of the body's final statement, where type
/// mismatches against the return type get reported.
pub(crate) fn tail_spans(input: &ItemFn) -> (Span, Span) {
    let Some(last) = input.block.stmts.last() else {
        let span = Span::call_site();
        return (span, span);
    };

    let mut tokens = last.to_token_stream().into_iter();
    let first = tokens.next().map_or_else(Span::call_site, |tt| tt.span());
    let end = tokens.last().map_or(first, |tt| tt.span());
    (first, end)
}

/// Re-emits `input` with `prologue` and `tail` as its new body. Inner
/// attributes of the original body are moved onto the function.
pub(crate) fn rebuild(
    input: ItemFn,
    extra_attrs: TokenStream,
    prologue: TokenStream,
    tail: TokenStream,
) -> TokenStream {
    let ItemFn {
        attrs, vis, sig, ..
    } = input;

    let attrs = attrs.into_iter().map(|mut attr| {
        attr.style = AttrStyle::Outer;
        attr
    });

    quote! {
        #(#attrs)*
        #extra_attrs
        #vis #sig {
            #prologue
            #tail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_recognizes_test_attributes() {
        let accepted: [Attribute; 4] = [
            parse_quote!(#[test]),
            parse_quote!(#[core::prelude::v1::test]),
            parse_quote!(#[::std::prelude::rust_2024::test]),
            parse_quote!(#[std::prelude::v1::test]),
        ];
        assert!(accepted.iter().all(is_test_attribute));

        let rejected: [Attribute; 4] = [
            parse_quote!(#[::test]),
            parse_quote!(#[test(foo)]),
            parse_quote!(#[taskthread::test]),
            parse_quote!(#[alloc::prelude::v1::test]),
        ];
        assert!(!rejected.iter().any(is_test_attribute));
    }

    #[test]
    fn test_lit_str_rejects_non_strings() {
        let ok: Lit = parse_quote!("io");
        assert_eq!(lit_str(&ok, "name").ok().as_deref(), Some("io"));

        let bad: Lit = parse_quote!(3);
        assert!(lit_str(&bad, "name").is_err());
    }

    #[test]
    fn test_tail_spans_of_empty_body() {
        let input: ItemFn = parse_quote! { fn empty() {} };
        let (start, end) = tail_spans(&input);
        assert_eq!(format!("{start:?}"), format!("{end:?}"));
    }

    #[test]
    fn test_rebuild_lifts_inner_attributes() {
        let input: ItemFn = parse_quote! {
            fn body() {
                #![allow(unused)]
                let x = 1;
            }
        };

        let out = rebuild(input, quote!(#[inline]), quote!(let y = 2;), quote!())
            .to_string()
            .replace(' ', "");
        assert!(out.starts_with("#[allow(unused)]#[inline]fnbody()"), "{out}");
        assert!(out.contains("lety=2;"), "{out}");
        assert!(!out.contains("letx"), "{out}");
    }
}

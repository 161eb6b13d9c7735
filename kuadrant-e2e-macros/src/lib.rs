//! Proc macros for the kuadrant-e2e harness
//!
//! Provides the `#[kuadrant_e2e::test]` attribute macro.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{FnArg, Ident, ItemFn, Pat, PatType, ReturnType, Token};

/// Attribute macro for tests that run against a Kuadrant environment.
///
/// Arguments name what the test needs; when a requirement is not met the
/// test is skipped, or fails when `KUADRANT_E2E_ENFORCE` is set. The decision
/// happens before any resource is created.
///
/// - `kuadrant_only` - the Kuadrant control plane is deployed
/// - `standalone_only` - standalone Authorino and Limitador are usable
/// - `mgc` - the multi-cluster gateway controller is deployed on the hub
/// - `performance` - performance tests are enabled
///
/// A parameter named `ctx` receives a [`Lifecycle`] for the test. Everything
/// created through it is cleaned up after the test, also when it panics or
/// the run is interrupted with SIGINT/SIGTERM.
///
/// # Example
///
/// ```ignore
/// use kuadrant_e2e::Lifecycle;
///
/// #[kuadrant_e2e::test(kuadrant_only)]
/// async fn test_route(ctx: Lifecycle) {
///     let stack = ctx.setup().await.unwrap();
///     assert!(stack.hostname().is_some());
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[kuadrant_e2e::test(standalone_only)]
/// async fn test_backend(ctx: Lifecycle) -> Result<(), kuadrant_e2e::HarnessError> {
///     ctx.create_backend().await?;
///     Ok(())
/// }
/// ```
///
/// [`Lifecycle`]: https://docs.rs/kuadrant-e2e/latest/kuadrant_e2e/lifecycle/struct.Lifecycle.html
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    let requirements = match parse_requirements(attr.into()) {
        Ok(requirements) => requirements,
        Err(e) => return e.to_compile_error().into(),
    };
    test_impl(&input_fn, &requirements).into()
}

/// Map attribute arguments to `Requirement` variant names
fn parse_requirements(attr: proc_macro2::TokenStream) -> syn::Result<Vec<Ident>> {
    let args = Punctuated::<Ident, Token![,]>::parse_terminated.parse2(attr)?;

    args.iter()
        .map(|arg| {
            let variant = match arg.to_string().as_str() {
                "kuadrant_only" => "Kuadrant",
                "standalone_only" => "Standalone",
                "mgc" => "Mgc",
                "performance" => "Performance",
                _ => {
                    return Err(syn::Error::new_spanned(
                        arg,
                        "expected one of: kuadrant_only, standalone_only, mgc, performance",
                    ))
                }
            };
            Ok(Ident::new(variant, arg.span()))
        })
        .collect()
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(input_fn: &ItemFn, requirements: &[Ident]) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    // Result bodies fail the test on Err
    let test_execution = match &input_fn.sig.output {
        ReturnType::Type(_, ty) => quote! {
            let result: #ty = async #fn_block.await;
            if let Err(e) = result {
                panic!("test returned an error: {:?}", e);
            }
        },
        ReturnType::Default => quote! {
            async #fn_block.await;
        },
    };

    let gate = quote! {
        ::kuadrant_e2e::telemetry::init_test_logging();

        let harness = match ::kuadrant_e2e::Harness::shared().await {
            Ok(harness) => harness,
            Err(e) => panic!("[kuadrant-e2e] failed to configure harness: {}", e),
        };

        match harness
            .gate(&[#(::kuadrant_e2e::Requirement::#requirements),*])
            .await
        {
            ::kuadrant_e2e::Verdict::Proceed => {}
            ::kuadrant_e2e::Verdict::Skip(reason) => {
                eprintln!("[kuadrant-e2e] SKIPPED {}: {}", stringify!(#fn_name), reason);
                return;
            }
            ::kuadrant_e2e::Verdict::Fail(reason) => panic!("{}", reason),
        }
    };

    if has_ctx_param(input_fn) {
        quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                use ::kuadrant_e2e::__private::FutureExt;

                // Held until cleanup finishes; the last scope released after
                // an interrupt exits the process
                let shutdown_scope = ::kuadrant_e2e::shutdown::ShutdownCoordinator::global().enter();

                #gate

                if let Some(interrupt) = shutdown_scope.interrupted() {
                    eprintln!("[kuadrant-e2e] {} received, {} not started", interrupt, stringify!(#fn_name));
                    return;
                }

                let test_id = concat!(module_path!(), "::", stringify!(#fn_name));
                #[allow(unused_mut)]
                let mut ctx = match harness.lifecycle(test_id).await {
                    Ok(ctx) => ctx,
                    Err(e) if e.is_skip() => {
                        eprintln!("[kuadrant-e2e] SKIPPED {}: {}", stringify!(#fn_name), e);
                        return;
                    }
                    Err(e) => panic!("[kuadrant-e2e] failed to prepare test: {}", e),
                };

                // Run test, catching panics and racing interrupts
                let outcome = shutdown_scope
                    .run_until_interrupted(
                        std::panic::AssertUnwindSafe(async {
                            #test_execution
                        })
                        .catch_unwind(),
                    )
                    .await;

                // Cleanup always runs before the outcome is reported
                let report = ctx.close().await;
                for (resource, error) in &report.failed {
                    eprintln!("[kuadrant-e2e] Warning: cleanup of {} failed: {}", resource, error);
                }

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(panic_info)) => std::panic::resume_unwind(panic_info),
                    Err(interrupt) => {
                        eprintln!("[kuadrant-e2e] {} received, resources cleaned up", interrupt);
                        drop(shutdown_scope);
                        // Other scopes are still cleaning up; the last one exits
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    } else {
        quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                #gate

                #test_execution
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{has_ctx_param, parse_requirements, test_impl};
    use quote::quote;
    use syn::ItemFn;

    fn parse_fn(code: &str) -> ItemFn {
        syn::parse_str(code).expect("Failed to parse test function")
    }

    fn expand(attr: proc_macro2::TokenStream, code: &str) -> String {
        let requirements = parse_requirements(attr).expect("Failed to parse arguments");
        test_impl(&parse_fn(code), &requirements).to_string()
    }

    #[test]
    fn test_has_ctx_param_with_ctx() {
        let f = parse_fn("async fn test_it(ctx: Lifecycle) {}");
        assert!(has_ctx_param(&f));
    }

    #[test]
    fn test_has_ctx_param_different_name() {
        let f = parse_fn("async fn test_it(context: Lifecycle) {}");
        assert!(!has_ctx_param(&f), "Only 'ctx' name should match");
    }

    #[test]
    fn test_parse_requirements() {
        let requirements = parse_requirements(quote!(kuadrant_only, performance)).unwrap();
        let names: Vec<String> = requirements.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["Kuadrant", "Performance"]);

        assert!(parse_requirements(quote!()).unwrap().is_empty());
        assert!(parse_requirements(quote!(mgc, standalone_only,)).is_ok());
    }

    #[test]
    fn test_parse_requirements_rejects_unknown() {
        let err = parse_requirements(quote!(kuadrant)).unwrap_err();
        assert!(err.to_string().contains("kuadrant_only"));
    }

    #[test]
    fn test_impl_gates_before_lifecycle() {
        let output = expand(
            quote!(kuadrant_only),
            "async fn test_route(ctx: Lifecycle) { ctx.setup().await.unwrap(); }",
        );

        assert!(output.contains("tokio :: test"), "Should have tokio::test");
        assert!(output.contains("Requirement :: Kuadrant"));
        let gate = output.find(". gate (").expect("Should gate the test");
        let lifecycle = output.find(". lifecycle (").expect("Should open a lifecycle");
        assert!(gate < lifecycle, "Should decide before creating resources");
    }

    #[test]
    fn test_impl_with_ctx_cleans_up() {
        let output = expand(quote!(), "async fn test_route(ctx: Lifecycle) {}");

        assert!(output.contains("catch_unwind"), "Should wrap with catch_unwind");
        assert!(output.contains("run_until_interrupted"), "Should race interrupts");
        assert!(output.contains("ctx . close ()"), "Should close the scope");
        let close = output.find("ctx . close ()").unwrap();
        let resume = output.find("resume_unwind").unwrap();
        assert!(close < resume, "Should clean up before re-panicking");
        assert!(!output.contains("process :: exit"), "Should leave exiting to the coordinator");
    }

    #[test]
    fn test_impl_enters_shutdown_scope_first() {
        let output = expand(quote!(kuadrant_only), "async fn test_route(ctx: Lifecycle) {}");

        let enter = output
            .find("ShutdownCoordinator :: global () . enter ()")
            .expect("Should register with the shutdown coordinator");
        let gate = output.find(". gate (").unwrap();
        let checked = output.find("shutdown_scope . interrupted ()").unwrap();
        let lifecycle = output.find(". lifecycle (").unwrap();
        assert!(enter < gate, "Should count the scope before deciding");
        assert!(checked < lifecycle, "Should not create resources after an interrupt");
    }

    #[test]
    fn test_impl_with_result_return() {
        let output = expand(
            quote!(standalone_only),
            "async fn test_backend(ctx: Lifecycle) -> Result<(), HarnessError> { Ok(()) }",
        );

        assert!(output.contains("let result : Result < () , HarnessError >"));
        assert!(output.contains("test returned an error"));
    }

    #[test]
    fn test_impl_without_ctx_skips_lifecycle() {
        let output = expand(quote!(mgc), "async fn test_simple() { assert!(true); }");

        assert!(output.contains("Requirement :: Mgc"));
        assert!(!output.contains("lifecycle"), "Should NOT create a Lifecycle");
        assert!(!output.contains("catch_unwind"));
    }

    #[test]
    fn test_impl_preserves_function_name_and_attrs() {
        let output = expand(quote!(), "#[ignore] async fn my_custom_test(ctx: Lifecycle) {}");

        assert!(output.contains("my_custom_test"));
        assert!(output.contains("# [ignore]"));
    }
}

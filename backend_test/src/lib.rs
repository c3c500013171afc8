use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one on a multi-threaded
/// runtime, inject dependencies, and enable test logging.
///
/// By default the test runs against a fresh in-memory store, and the
/// injectable dependencies are `crate::store::MemoryStore`,
/// `crate::store::Store` and [`rocket::local::asynchronous::Client`], all
/// sharing that one store.
///
/// With `#[backend_test(mongo)]` the test runs against a MongoDB store on a
/// randomly named database, which is dropped regardless of how the test
/// terminates. The injectable dependencies are then `crate::store::MongoStore`,
/// [`mongodb::Database`], `crate::store::Store` and
/// [`rocket::local::asynchronous::Client`]. Such tests are skipped when
/// `ROCKET_DB_URI` is not set.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    let mongo = match parse_macro_input!(args as Option<Ident>) {
        None => false,
        Some(arg) if arg == "mongo" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `mongo`")
                .into_compile_error()
                .into();
        }
    };

    // Extract the dependencies to inject and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), mongo) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let body = if mongo {
        mongo_body(&new_name, &test_args)
    } else {
        memory_body(&new_name, &test_args)
    };

    quote! {
        #[test]
        fn #name() {
            log4rs_test_utils::test_logging::init_logging_once_for(["ballotbox_backend"], None, None);

            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            #body
        }
    }
    .into()
}

fn memory_body(test: &Ident, test_args: &[TokenStream2]) -> TokenStream2 {
    quote! {
        runtime.block_on(async {
            let memory_store = crate::store::MemoryStore::new();
            let store = crate::store::Store::new(memory_store.clone());
            let rocket_client = crate::test_client(store.clone()).await;
            #test(#(#test_args),*).await;
        });
    }
}

fn mongo_body(test: &Ident, test_args: &[TokenStream2]) -> TokenStream2 {
    quote! {
        // Test setup.
        let Some((mongo_store, db)) = runtime.block_on(crate::test_mongo_store()) else {
            eprintln!("ROCKET_DB_URI is not set, skipping");
            return;
        };

        // Run the test, catching any panics.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runtime.block_on(async {
                let store = crate::store::Store::new(mongo_store.clone());
                let rocket_client = crate::test_client(store.clone()).await;
                #test(#(#test_args),*).await;
            });
        }));

        // Test cleanup.
        runtime.block_on(db.drop(None)).unwrap();

        // If the test panicked, re-raise the panic.
        if let Err(cause) = result {
            std::panic::resume_unwind(cause);
        }
    }
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature, mongo: bool) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = Vec::new();
    let mut args = vec![];

    for input in &sig.inputs {
        let type_ident = match input {
            FnArg::Typed(pat_type) => match (&*pat_type.pat, &*pat_type.ty) {
                (Pat::Ident(_), Type::Path(type_path)) => type_path.path.segments.last().map(|s| s.ident.clone()),
                _ => None,
            },
            FnArg::Receiver(_) => None,
        };

        let arg = match type_ident {
            Some(ident) if ident == "Client" => quote! { rocket_client },
            Some(ident) if ident == "Store" => quote! { store.clone() },
            Some(ident) if ident == "MemoryStore" && !mongo => quote! { memory_store.clone() },
            Some(ident) if ident == "MongoStore" && mongo => quote! { mongo_store.clone() },
            Some(ident) if ident == "Database" && mongo => quote! { db.clone() },
            _ => {
                let expected = if mongo {
                    "Expected one of `Client`, `Store`, `MongoStore` or `Database`"
                } else {
                    "Expected one of `Client`, `Store` or `MemoryStore`"
                };
                return Err(syn::Error::new(input.span(), expected));
            }
        };

        let key = arg.to_string();
        if seen.contains(&key) {
            return Err(syn::Error::new(
                input.span(),
                "Test cannot accept the same dependency more than once",
            ));
        }
        seen.push(key);
        args.push(arg);
    }

    Ok(args)
}

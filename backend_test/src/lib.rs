use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type,
};

/// Environment variable holding the MongoDB URI for `#[backend_test(mongodb)]`.
const DB_URI_VAR: &str = "EVOTE_TEST_DB_URI";

/// Transform an asynchronous test into a synchronous one and inject
/// dependencies.
///
/// By default the test runs against a fresh in-memory store, and may accept
/// a [`rocket::local::asynchronous::Client`] and a `crate::ledger::SharedStore`.
///
/// With `#[backend_test(mongodb)]` the test runs against a freshly named
/// database on the replica set named by `EVOTE_TEST_DB_URI`, and is skipped
/// if that variable is unset. It may additionally accept a [`mongodb::Database`],
/// a `crate::ledger::MongoStore` and any `crate::model::mongodb::Coll<T>`. The
/// database is dropped however the test terminates.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    let mongodb = match parse_macro_input!(args as Option<Ident>) {
        None => false,
        Some(arg) if arg == "mongodb" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `mongodb`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let injected = match check_sig(item_fn.sig.clone(), mongodb) {
        Ok(injected) => injected,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    if mongodb {
        mongodb_test(name, new_name, item_fn, injected)
    } else {
        memory_test(name, new_name, item_fn, injected)
    }
    .into()
}

fn memory_test(name: Ident, new_name: Ident, item_fn: ItemFn, injected: Injected) -> TokenStream2 {
    let Injected { args, .. } = injected;
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store: crate::ledger::SharedStore =
                    std::sync::Arc::new(crate::ledger::MemoryStore::new());
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_store(crate::test_figment(), store.clone()),
                )
                .await
                .unwrap();

                #new_name(#(#args),*).await;
            });
        }
    }
}

fn mongodb_test(name: Ident, new_name: Ident, item_fn: ItemFn, injected: Injected) -> TokenStream2 {
    let Injected {
        args,
        collection_idents,
        collection_types,
    } = injected;
    quote! {
        #[test]
        fn #name() {
            let db_uri = match std::env::var(#DB_URI_VAR) {
                Ok(db_uri) => db_uri,
                Err(_) => {
                    eprintln!("Skipping {}: {} is not set", stringify!(#name), #DB_URI_VAR);
                    return;
                }
            };

            /// Test setup.
            async fn setup(
                db_uri: String,
            ) -> (
                rocket::local::asynchronous::Client,
                crate::ledger::MongoStore,
                mongodb::Database,
            ) {
                let db_client = mongodb::Client::with_uri_str(db_uri).await.unwrap();
                let db = db_client.database(&crate::config::get_database_name());
                let mongo_store = crate::ledger::MongoStore::connect(db_client, db.clone())
                    .await
                    .unwrap();
                let store: crate::ledger::SharedStore = std::sync::Arc::new(mongo_store.clone());
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_store(crate::test_figment(), store),
                )
                .await
                .unwrap();

                (rocket_client, mongo_store, db)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: mongodb::Database) {
                db.drop(None).await.unwrap();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, mongo_store, db) = outer_runtime.block_on(setup(db_uri));

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(mongo_store);
            let db_mutex = std::sync::Mutex::new(db.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let mongo_store = store_mutex.into_inner().unwrap();
                let store: crate::ledger::SharedStore = std::sync::Arc::new(mongo_store.clone());
                let db = db_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                #(
                    let #collection_idents = crate::model::mongodb::Coll::<#collection_types>::from_db(&db);
                )*

                runtime.block_on(#new_name(#(#args),* #(,#collection_idents)*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
}

/// Arguments to pass to the wrapped test, in order, plus the collections to
/// construct for it.
struct Injected {
    args: Vec<TokenStream2>,
    collection_idents: Vec<Ident>,
    collection_types: Vec<Ident>,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject
/// unknown parameters or ones the backend cannot supply.
fn check_sig(sig: Signature, mongodb: bool) -> Result<Injected, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = Vec::<String>::new();
    let mut injected = Injected {
        args: vec![],
        collection_idents: vec![],
        collection_types: vec![],
    };

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(pat_ident) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        let (arg, needs_mongodb) = match type_ident.to_string().as_str() {
                            "Client" => (quote! { rocket_client }, false),
                            "SharedStore" => (quote! { store.clone() }, false),
                            "MongoStore" => (quote! { mongo_store.clone() }, true),
                            "Database" => (quote! { db.clone() }, true),
                            _ => {
                                return Err(unexpected(input));
                            }
                        };
                        if needs_mongodb && !mongodb {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("`{type_ident}` needs `#[backend_test(mongodb)]`"),
                            ));
                        }
                        if seen.contains(&type_ident.to_string()) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        seen.push(type_ident.to_string());
                        injected.args.push(arg);
                        continue;
                    }

                    // Valid as the last path segment for any type is itself
                    let possible_collection = type_path.path.segments.last().unwrap();
                    if possible_collection.ident == "Coll" {
                        if !mongodb {
                            return Err(syn::Error::new(
                                input.span(),
                                "`Coll<T>` needs `#[backend_test(mongodb)]`",
                            ));
                        }
                        if let PathArguments::AngleBracketed(generics) =
                            &possible_collection.arguments
                        {
                            if let Some(GenericArgument::Type(Type::Path(type_path))) =
                                generics.args.first()
                            {
                                if let Some(type_ident) = type_path.path.get_ident() {
                                    injected.collection_idents.push(pat_ident.ident.clone());
                                    injected.collection_types.push(type_ident.clone());
                                    continue;
                                }
                            }
                        }
                    }
                }
            }
        }

        return Err(unexpected(input));
    }

    Ok(injected)
}

fn unexpected(input: &FnArg) -> syn::Error {
    syn::Error::new(
        input.span(),
        "Expected one of `Client`, `SharedStore`, `MongoStore`, `Database` or `Coll<T>`",
    )
}

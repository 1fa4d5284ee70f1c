#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Attribute macros that run a function with a `TaskThread` installed as the
//! current thread.

mod entry;
mod parse;

/// Runs `main` with the main OS thread wrapped in a TaskThread.
///
/// Tasks posted to the current thread run whenever `main` pumps it with
/// `process_messages`. The thread is stopped and destroyed when `main`
/// returns.
///
/// # Flavors
///
/// * `flavor = "auto"` (default) installs an `AutoThread`.
/// * `flavor = "socket_server"` installs an `AutoSocketServerThread` backed by a
///   `NullSocketServer`, hiding any thread that was current before.
///
/// The thread name can be set with `name = "..."`.
///
/// # Usage
///
/// ```ignore
/// #[taskthread::main]
/// fn main() {
///     let current = taskthread::TaskThread::current().unwrap();
///     current.post_task(|| println!("Hello world"));
///     current.process_messages(taskthread::Timeout::ZERO);
/// }
/// ```
///
/// Equivalent code not using `#[taskthread::main]`
///
/// ```ignore
/// fn main() {
///     let _thread = taskthread::AutoThread::from_builder(
///         taskthread::Builder::new().name("main"),
///     );
///
///     let current = taskthread::TaskThread::current().unwrap();
///     current.post_task(|| println!("Hello world"));
///     current.process_messages(taskthread::Timeout::ZERO);
/// }
/// ```
///
/// # Function arguments
///
/// Function arguments are NOT allowed on `main`.
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Marks a test function that runs with a TaskThread installed as the
/// current thread of the test's OS thread.
///
/// Each test gets its own thread, stopped and destroyed when the test body
/// returns or panics. The body may return `Result`, like any `#[test]`.
///
/// ```ignore
/// #[taskthread::test]
/// fn my_test() {
///     assert!(taskthread::TaskThread::current().is_some());
/// }
/// ```
///
/// Equivalent code not using `#[taskthread::test]`
///
/// ```ignore
/// #[test]
/// fn my_test() {
///     let _thread = taskthread::AutoThread::from_builder(
///         taskthread::Builder::new().name("my_test"),
///     );
///     assert!(taskthread::TaskThread::current().is_some());
/// }
/// ```
///
/// ### With a socket server thread
///
/// ```ignore
/// #[taskthread::test(flavor = "socket_server", name = "io")]
/// fn my_test() {
///     assert_eq!(taskthread::TaskThread::current().unwrap().name(), "io");
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}

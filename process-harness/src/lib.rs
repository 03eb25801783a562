//! Runs a server binary in a separate process from an integration test and asserts on its lifecycle.
//!
//! The binary is expected to log [`tracing`](https://docs.rs/tracing) events as JSON to stdout.
//! [`ServerProcess`] parses them, fails the test on any unexpected warning or error,
//! and prints them to the test output in human readable form.
//!
//! Example usage for the dispatcher binary:
//!
//! ```rust
//! use process_harness::{bin_path, free_port, probe_http, ServerProcess};
//! use std::time::Duration;
//! # // hack to make the doc test compile
//! # macro_rules! bin_path {
//! #     ($bin_name:expr) => {
//! #         std::path::PathBuf::from("foo")
//! #     };
//! # }
//!
//! async fn test_ping() {
//!     let port = free_port();
//!     let port_arg = format!("--port={port}");
//!     let mut dispatcher = ServerProcess::start(
//!         &bin_path!("dispatcher"),
//!         "dispatcher",
//!         &["--log-format", "json", "server", port_arg.as_str()],
//!     )
//!     .await;
//!
//!     // block asynchronously until the server reports the address it bound
//!     let address = tokio::time::timeout(Duration::from_secs(30), dispatcher.wait_until_listening())
//!         .await
//!         .unwrap();
//!     assert_eq!(address.port(), port);
//!
//!     let response = probe_http(port, "/ping", 5, Duration::from_millis(500)).await.unwrap();
//!     assert_eq!(response.body, "pong\n");
//!
//!     // SIGTERM the server and assert that it exits cleanly without warnings or errors.
//!     // A drop bomb fails the test if the process is never finished like this.
//!     let shutdown = dispatcher.shutdown(&[]).await;
//!     assert!(shutdown.elapsed < Duration::from_secs(5));
//! }
//! ```
pub mod event;
pub mod event_matcher;
mod probe;
mod process;

pub use probe::{free_port, probe_http, ProbeResponse};
pub use process::{Exit, ServerProcess, Shutdown};

/// When called from within an integration test or benchmark, returns the path to the binary with the specified crate name in the current package.
///
/// Whenever Cargo compiles a benchmark or integration test any binary crates in the same package will also be compiled.
/// This macro returns the path to one of those compiled binaries.
/// If no such binary exists then the macro will fail to compile.
#[macro_export]
macro_rules! bin_path {
    ($bin_name:expr) => {
        std::path::PathBuf::from(std::env!(concat!("CARGO_BIN_EXE_", $bin_name)))
    };
}

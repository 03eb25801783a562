//! Process lifecycle and diagnostics of the image jobs dispatcher.
//!
//! [`lifecycle::Lifecycle`] binds the HTTP listener, serves the `/ping` liveness probe alongside
//! any application routes and shuts down gracefully on SIGINT/SIGTERM.
//! [`stacktrace::capture_stack_trace`] renders the stacks of the running workers for crash reports.
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod shutdown;
pub mod signals;
pub mod stacktrace;
mod tracing_panic_handler;

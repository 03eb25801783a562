use crate::config::LogFormat;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stdout through a non-blocking worker.
///
/// The returned guard flushes pending events when dropped, so it has to be held until the end of `main`.
/// `RUST_LOG` takes precedence over the level implied by `debug`.
pub fn init_tracing(format: LogFormat, debug: bool) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_file(debug)
        .with_line_number(debug);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Human => builder.init(),
    }

    // When in json mode we need to process panics as events instead of printing directly to stdout.
    // This is so that:
    // * We dont include invalid json in stdout
    // * panics can be received by whatever is processing the json events
    //
    // We dont do this for LogFormat::Human because the default panic messages are more readable for humans
    if let LogFormat::Json = format {
        crate::tracing_panic_handler::setup();
    }

    guard
}

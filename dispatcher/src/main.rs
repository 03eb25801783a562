use clap::Parser;
use dispatcher::config::{Command, ConfigOpts, ServerConfig};
use dispatcher::error::LifecycleError;
use dispatcher::lifecycle::Lifecycle;
use dispatcher::logging::init_tracing;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let opts = ConfigOpts::parse();
    let Command::Server(server_opts) = &opts.command;
    let config = ServerConfig::from(server_opts);

    // Dropping the guard flushes buffered events, so every path out of main has to go through here.
    let _guard = init_tracing(opts.log_format, config.debug);

    match server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn server(config: ServerConfig) -> Result<(), LifecycleError> {
    tracing::info!("Initializing!");
    tracing::debug!(?config, "debug logging enabled");

    let mut lifecycle = Lifecycle::new(config);
    // Registered before binding so a signal can never hit the default handler once we are reachable.
    lifecycle.register_signals()?;

    let server = lifecycle.start().await?;
    server.run().await;
    Ok(())
}
